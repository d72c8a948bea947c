//! Source-URL classification and share-token extraction.

/// A magnet URI goes through the drive's offline-download queue; anything
/// else is treated as a drive share link.
pub fn is_magnet(url: &str) -> bool {
    url.starts_with("magnet:?")
}

/// Extract the share token from `https://mypikpak.com/s/<token>`.
pub fn parse_share_token(url: &str) -> Option<&str> {
    let rest = url.split("mypikpak.com/s/").nth(1)?;
    let token: &str = rest
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or("");
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

const VIDEO_EXTENSIONS: [&str; 12] = [
    "mp4", "mkv", "avi", "wmv", "mov", "flv", "webm", "m4v", "rmvb", "rm", "ts", "m2ts",
];

/// Case-insensitive video check on the filename extension.
pub fn is_video_filename(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_detection() {
        assert!(is_magnet("magnet:?xt=urn:btih:AAAABBBB"));
        assert!(!is_magnet("https://mypikpak.com/s/ABCDE"));
        assert!(!is_magnet("MAGNET:?xt=x"));
    }

    #[test]
    fn share_token_extraction() {
        assert_eq!(parse_share_token("https://mypikpak.com/s/ABCDE"), Some("ABCDE"));
        assert_eq!(
            parse_share_token("https://mypikpak.com/s/VOxrB8Qd?path=foo"),
            Some("VOxrB8Qd")
        );
        assert_eq!(parse_share_token("https://mypikpak.com/s/"), None);
        assert_eq!(parse_share_token("https://example.com/s/ABCDE"), None);
    }

    #[test]
    fn video_extension_matching() {
        assert!(is_video_filename("Movie.mkv"));
        assert!(is_video_filename("Movie.MKV"));
        assert!(is_video_filename("ep01.m2ts"));
        assert!(!is_video_filename("readme.txt"));
        assert!(!is_video_filename("noextension"));
        assert!(!is_video_filename("archive.tar.gz"));
    }
}
