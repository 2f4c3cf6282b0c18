//! Small shared helpers with no better home.

/// Lowercase hex encoding. Used everywhere a `Sha256::digest` needs to become
/// a string for a verdict, log line, or envelope field.
pub fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.as_ref().len() * 2);
    for b in bytes.as_ref() {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}
