// ============== Text Helpers ==============

/// Cut `s` to `max_len` characters, appending `...` when something was cut.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Hard-split `s` into pieces of at most `max_len` characters.
pub fn split_text(s: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;

    for ch in s.chars() {
        if cur_len >= max_len {
            out.push(std::mem::take(&mut cur));
            cur_len = 0;
        }
        cur.push(ch);
        cur_len += 1;
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Join `parts` with `sep` into as few messages as possible, none longer
/// than `max_len` characters.
///
/// Parts are never reordered. A part that alone exceeds the limit is
/// hard-split with [`split_text`].
pub fn pack_messages<S: AsRef<str>>(parts: &[S], sep: &str, max_len: usize) -> Vec<String> {
    let sep_len = sep.chars().count();
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;

    for part in parts {
        let part = part.as_ref();
        let part_len = part.chars().count();

        if part_len > max_len {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
                cur_len = 0;
            }
            out.extend(split_text(part, max_len));
            continue;
        }

        if cur.is_empty() {
            cur.push_str(part);
            cur_len = part_len;
        } else if cur_len + sep_len + part_len <= max_len {
            cur.push_str(sep);
            cur.push_str(part);
            cur_len += sep_len + part_len;
        } else {
            out.push(std::mem::replace(&mut cur, part.to_string()));
            cur_len = part_len;
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}
