use std::path::{Component, Path};

/// Canonical form of an entry key: `/` separators, no leading `./` or `/`,
/// no trailing separator, no empty segments.
pub fn normalize_key(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Validates that a relative `key` stays inside whatever root it is joined
/// onto. Rejects `..` escapes and absolute or prefixed paths.
pub fn is_key_safe(key: &str) -> bool {
    let target = Path::new(key);
    if target.is_absolute() {
        return false;
    }

    let mut depth: i32 = 0;
    for component in target.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => {
                depth += 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }

    true
}

/// Last segment of a key, for progress display.
pub fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
