//! Image reference helpers.
//!
//! An image can be addressed with or without the implicit Docker Hub
//! registry and `library/` namespace (`alpine:latest`,
//! `library/alpine:latest`, `docker.io/library/alpine:latest`). The engine
//! reports the short spelling in repo tags, so presence checks normalize
//! references first.

/// Registry assumed when a reference names no host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Other spellings of the Docker Hub registry.
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

/// Prefixes stripped by [`normalize_image_name`]. Order matters: the
/// specific patterns must win over the bare registry one.
const NORMALIZED_PREFIXES: &[&str] = &["docker.io/library/", "library/", "docker.io/"];

/// Strips the default registry and `library/` namespace from a reference.
///
/// Only the first matching prefix is removed:
/// - `docker.io/library/alpine:latest` → `alpine:latest`
/// - `library/alpine:latest` → `alpine:latest`
/// - `docker.io/alpine/socat:latest` → `alpine/socat:latest`
/// - anything else is returned unchanged.
pub fn normalize_image_name(image: &str) -> String {
    NORMALIZED_PREFIXES
        .iter()
        .find_map(|prefix| image.strip_prefix(prefix))
        .unwrap_or(image)
        .to_string()
}

/// Returns the registry host a reference would be pulled from.
///
/// The first path component is a registry host when it contains a `.` or a
/// `:` or is `localhost`; otherwise the reference lives on
/// [`DEFAULT_REGISTRY`].
///
/// ```
/// use dockrun::execution::parse_registry;
///
/// assert_eq!(parse_registry("host.xyz/image:tag"), "host.xyz");
/// assert_eq!(parse_registry("username/image:tag"), "docker.io");
/// assert_eq!(parse_registry("docker.io/username/image:tag"), "docker.io");
/// ```
pub fn parse_registry(image: &str) -> String {
    let registry = match image.split_once('/') {
        Some((first, _)) if is_registry_host(first) => first,
        _ => DEFAULT_REGISTRY,
    };
    normalize_registry_address(registry)
}

/// Canonical form of a registry address.
///
/// Drops any URL scheme and path (`https://index.docker.io/v1/`) and folds
/// Docker Hub aliases into [`DEFAULT_REGISTRY`].
pub fn normalize_registry_address(address: &str) -> String {
    let trimmed = address.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_lowercase();
    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

/// Splits a reference into repository and tag.
///
/// The tag is empty when the reference has none. Digest references keep the
/// digest (`sha256:…`) as tag.
pub fn split_repository_tag(image: &str) -> (String, String) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo.to_string(), digest.to_string());
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), String::new()),
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
