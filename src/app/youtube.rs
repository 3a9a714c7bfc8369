pub(crate) fn watch_url(media_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={media_id}")
}

/// Pulls the video id out of a YouTube link, or accepts a bare id.
///
/// Understands `youtu.be/<id>`, `youtube.com/watch?v=<id>` and the
/// `/shorts/`, `/embed/` and `/v/` path forms, with or without a scheme.
pub(crate) fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if is_bare_id(input) {
        return Some(input.to_string());
    }

    let without_scheme = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    let (host, rest) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));
    let host = host.to_ascii_lowercase();
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let path = path.split('#').next().unwrap_or_default();

    let id = if host == "youtu.be" || host == "www.youtu.be" {
        path.split('/').next().unwrap_or_default()
    } else if host.ends_with("youtube.com") || host.ends_with("youtube-nocookie.com") {
        if path == "watch" {
            query_param(query, "v").unwrap_or_default()
        } else {
            ["shorts/", "embed/", "v/"]
                .iter()
                .find_map(|prefix| path.strip_prefix(prefix))
                .and_then(|tail| tail.split('/').next())
                .unwrap_or_default()
        }
    } else {
        ""
    };

    is_bare_id(id).then(|| id.to_string())
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('#')
        .next()
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn is_bare_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
