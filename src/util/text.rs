use std::borrow::Cow;

/// Marker appended to excerpts that were cut short.
const ELLIPSIS: &str = "...";

/// Cuts `s` to at most `max_bytes` bytes of text, appending "..." when it had
/// to cut.
///
/// The cut always lands on a UTF-8 character boundary, so multi-byte
/// characters (Cyrillic, CJK, emoji) are never split. The ellipsis is not
/// counted against `max_bytes`.
///
/// # Examples
///
/// ```
/// use feedrelay::util::truncate_excerpt;
///
/// assert_eq!(truncate_excerpt("Short", 10), "Short");
/// assert_eq!(truncate_excerpt("Hello World", 5), "Hello...");
/// // "п" is two bytes wide; a 3-byte budget only fits one of them
/// assert_eq!(truncate_excerpt("привет", 3), "п...");
/// ```
pub fn truncate_excerpt(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }

    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }

    Cow::Owned(format!("{}{}", s[..cut].trim_end(), ELLIPSIS))
}

/// Derives the user-facing slug of a feed from its display name.
///
/// Letters and digits are kept (lowercased, any script), every run of other
/// characters becomes a single hyphen, and leading/trailing hyphens are
/// dropped. A name with no alphanumeric characters yields an empty slug.
///
/// ```
/// use feedrelay::util::slugify;
///
/// assert_eq!(slugify("Hacker News: Front Page"), "hacker-news-front-page");
/// assert_eq!(slugify("  Хабр / Все потоки "), "хабр-все-потоки");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Collapses every run of whitespace into a single space and trims the ends.
///
/// HTML-to-text conversion leaves hard line wraps and blank lines behind;
/// excerpts are sent as a single paragraph.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and excerpts are attacker-controlled and end up in operator
/// logs and outbound messages.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains no control characters.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().any(|&b| is_stripped(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameter bytes up to and including the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: runs until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_stripped(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped(bytes[i]) {
                i += 1;
            }
            // Runs only break on ASCII control bytes, which never occur inside
            // a multi-byte sequence, so this slice is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_stripped(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}
