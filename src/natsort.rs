//! Natural (alphanumeric) ordering for slide identifiers.
//!
//! Block and sub-specimen labels mix digits and letters ("A2", "A10", "IIb").
//! Plain lexicographic order puts "A10" before "A2"; natural order compares
//! digit runs by value instead.

use std::cmp::Ordering;

/// Compare two strings in natural order.
///
/// Runs of ASCII digits are compared numerically (ignoring leading zeros),
/// everything else byte-wise. Equal numeric values with differing zero
/// padding fall back to run length so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_rest = a.as_bytes();
    let mut b_rest = b.as_bytes();

    loop {
        match (a_rest.first(), b_rest.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let (a_run, a_tail) = split_digit_run(a_rest);
                    let (b_run, b_tail) = split_digit_run(b_rest);
                    let ordering = cmp_digit_runs(a_run, b_run);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                    a_rest = a_tail;
                    b_rest = b_tail;
                } else {
                    if ca != cb {
                        return ca.cmp(cb);
                    }
                    a_rest = &a_rest[1..];
                    b_rest = &b_rest[1..];
                }
            }
        }
    }
}

fn split_digit_run(bytes: &[u8]) -> (&[u8], &[u8]) {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    bytes.split_at(end)
}

fn cmp_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let a_trim = trim_leading_zeros(a);
    let b_trim = trim_leading_zeros(b);
    // longer run of significant digits means larger value
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != b'0')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
