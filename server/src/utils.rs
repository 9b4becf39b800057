use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Read one non-empty, percent-decoded parameter from a request query string
pub fn query_param(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| percent_decode(v))
        .filter(|v| !v.is_empty())
}

// `+` is a space; malformed escapes are kept as written
fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' => {
                let escaped = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match escaped {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 2;
                    }
                    None => decoded.push(b'%'),
                }
            }
            b => decoded.push(b),
        }
        i += 1;
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_increasing() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }

    #[test]
    fn test_query_param() {
        assert_eq!(query_param("name=alice", "name").as_deref(), Some("alice"));
        assert_eq!(query_param("x=1&name=bob&y=2", "name").as_deref(), Some("bob"));
        assert_eq!(query_param("name=", "name"), None);
        assert_eq!(query_param("username=carol", "name"), None);
        assert_eq!(query_param("", "name"), None);
    }

    #[test]
    fn test_query_param_is_percent_decoded() {
        assert_eq!(query_param("name=jo%20ann", "name").as_deref(), Some("jo ann"));
        assert_eq!(query_param("name=jo+ann", "name").as_deref(), Some("jo ann"));
        assert_eq!(query_param("name=J%C3%BCrgen", "name").as_deref(), Some("Jürgen"));
        assert_eq!(query_param("name=100%", "name").as_deref(), Some("100%"));
        assert_eq!(query_param("name=%zzx", "name").as_deref(), Some("%zzx"));
        assert_eq!(query_param("name=%FF", "name"), None);
    }
}
