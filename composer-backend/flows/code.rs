//! Flow codes have the shape `XXX-99`: three upper-case ASCII letters, a
//! hyphen, two digits.

const LETTERS: usize = 3;
const DIGITS: usize = 2;

/// Mask raw keystroke input into a (possibly partial) flow code.
///
/// Characters are consumed in order: the first three accepted characters
/// must be letters (upper-cased), the next two must be digits. Anything
/// else is dropped. The hyphen is inserted only once a digit exists, so a
/// partial entry like `"AB"` stays `"AB"`.
///
/// Masking its own output is a no-op.
pub fn mask(input: &str) -> String {
    let mut letters = String::with_capacity(LETTERS);
    let mut digits = String::with_capacity(DIGITS);

    for c in input.chars() {
        if letters.len() < LETTERS {
            if c.is_ascii_alphabetic() {
                letters.push(c.to_ascii_uppercase());
            }
        } else if digits.len() < DIGITS {
            if c.is_ascii_digit() {
                digits.push(c);
            }
        } else {
            break;
        }
    }

    if digits.is_empty() {
        letters
    } else {
        format!("{letters}-{digits}")
    }
}

/// True iff `code` matches `^[A-Z]{3}-[0-9]{2}$`.
pub fn validate(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == LETTERS + 1 + DIGITS
        && bytes[..LETTERS].iter().all(|b| b.is_ascii_uppercase())
        && bytes[LETTERS] == b'-'
        && bytes[LETTERS + 1..].iter().all(|b| b.is_ascii_digit())
}
