use url::Url;

const DEFAULT_EXTENSION: &str = ".jpg";

/// Appends a default image extension when the URL's last path segment has
/// none. Some feeds link image posts without one.
pub fn ensure_image_extension(raw: &str) -> String {
    if let Ok(parsed) = Url::parse(raw) {
        let has_extension = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .is_some_and(|segment| segment.contains('.'));
        if has_extension {
            return raw.to_string();
        }
        let mut rewritten = parsed;
        let path = format!("{}{DEFAULT_EXTENSION}", rewritten.path());
        rewritten.set_path(&path);
        return rewritten.to_string();
    }

    // Not an absolute URL; fall back to a plain string check.
    match (raw.rfind('.'), raw.rfind('/')) {
        (Some(dot), Some(slash)) if dot > slash => raw.to_string(),
        (Some(_), None) => raw.to_string(),
        _ => format!("{raw}{DEFAULT_EXTENSION}"),
    }
}

/// Joins a feed-relative permalink onto the feed's site base. Permalinks that
/// are already absolute are kept as-is.
pub fn absolutize_permalink(base: &str, permalink: &str) -> String {
    if Url::parse(permalink).is_ok() {
        return permalink.to_string();
    }
    match Url::parse(base).and_then(|parsed| parsed.join(permalink)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), permalink.trim_start_matches('/')),
    }
}
