//! ---
//! smon_section: "02-bus-adapters"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Notification-bus contract and adapters."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Unit-name escaping for service-manager object paths. Alphanumerics pass
//! through, everything else (and a leading digit) becomes `_xx` with the
//! byte rendered as lowercase hex.

const OBJECT_PATH_PREFIX: &str = "/org/freedesktop/systemd1/unit/";

/// Escape a unit name for use in an object path.
pub fn escape_unit_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() * 3);
    for (index, byte) in name.bytes().enumerate() {
        let passthrough = byte.is_ascii_alphanumeric() && !(index == 0 && byte.is_ascii_digit());
        if passthrough {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02x}", byte));
        }
    }
    escaped
}

/// Invert [`escape_unit_name`]. Malformed escape sequences are kept verbatim
/// rather than dropped, so a bad path stays visible in logs.
pub fn unescape_unit_name(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut name = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'_' && index + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&escaped[index + 1..index + 3], 16) {
                name.push(value);
                index += 3;
                continue;
            }
        }
        name.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&name).into_owned()
}

/// Full object path for a unit name.
pub fn unit_object_path(name: &str) -> String {
    format!("{}{}", OBJECT_PATH_PREFIX, escape_unit_name(name))
}

/// Extract and unescape the unit name from an object path, when the path
/// belongs to the unit namespace.
pub fn unit_name_from_path(path: &str) -> Option<String> {
    let escaped = path.strip_prefix(OBJECT_PATH_PREFIX)?;
    if escaped.is_empty() {
        return None;
    }
    Some(unescape_unit_name(escaped))
}
