const INDENT_SIZE: usize = 2;

pub const ASCII_CHARS: [char; 26] = ascii_chars();

const fn ascii_chars() -> [char; 26] {
    let mut chars = ['\0'; 26];
    let mut c: u8 = b'a';
    while c <= b'z' {
        chars[(c - b'a') as usize] = c as char;
        c += 1;
    }
    chars
}

/// Returns a short name for the loop argument at `idx`.
///
/// Names run `a` through `z`, then `aa`, `ab`, and so on.
///
/// ```
/// # use nestgrid::utils::ascii_name;
/// assert_eq!(ascii_name(0), "a");
/// assert_eq!(ascii_name(25), "z");
/// assert_eq!(ascii_name(26), "aa");
/// assert_eq!(ascii_name(27), "ab");
/// ```
pub fn ascii_name(idx: usize) -> String {
    if idx < ASCII_CHARS.len() {
        return ASCII_CHARS[idx].to_string();
    }
    let mut name = ascii_name(idx / ASCII_CHARS.len() - 1);
    name.push(ASCII_CHARS[idx % ASCII_CHARS.len()]);
    name
}

pub fn indent(depth: usize) -> String {
    " ".repeat(depth * INDENT_SIZE)
}
