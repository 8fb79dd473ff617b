/// Escapes special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping these characters:
/// `_`, `*`, `[`, `]`, `(`, `)`, `~`, `` ` ``, `>`, `#`, `+`, `-`, `=`, `|`, `{`, `}`, `.`, `!`
/// and the backslash itself.
///
/// # Example
///
/// ```
/// use clipfetch::core::utils::escape_markdown_v2;
///
/// let escaped = escape_markdown_v2("Hello. World!");
/// assert_eq!(escaped, "Hello\\. World\\!");
/// ```
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];

    let mut result = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            result.push('\\');
        }
        result.push(c);
    }
    result
}

/// Formats a duration in seconds as `m:ss` or `h:mm:ss`.
///
/// ```
/// use clipfetch::core::utils::format_duration;
///
/// assert_eq!(format_duration(65), "1:05");
/// assert_eq!(format_duration(3723), "1:02:03");
/// ```
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Human readable size with one decimal, binary units.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Cuts `text` to at most `max_chars` characters, adding an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Builds the MarkdownV2 caption of a delivered file.
///
/// `*Author* — _Title_` on the first line, then platform, duration and size.
/// Missing fields are skipped.
pub fn format_media_caption(
    platform: &str,
    title: &str,
    author: Option<&str>,
    duration_secs: Option<u64>,
    size_bytes: Option<u64>,
) -> String {
    let title = truncate_chars(title.trim(), 200);
    let mut caption = match author.map(str::trim).filter(|a| !a.is_empty()) {
        Some(author) => format!(
            "*{}* — _{}_",
            escape_markdown_v2(&truncate_chars(author, 100)),
            escape_markdown_v2(&title)
        ),
        None if title.is_empty() => String::new(),
        None => format!("_{}_", escape_markdown_v2(&title)),
    };

    let mut details = vec![escape_markdown_v2(platform)];
    if let Some(secs) = duration_secs.filter(|s| *s > 0) {
        details.push(escape_markdown_v2(&format_duration(secs)));
    }
    if let Some(size) = size_bytes {
        details.push(escape_markdown_v2(&format_file_size(size)));
    }

    if !caption.is_empty() {
        caption.push('\n');
    }
    caption.push_str(&details.join(" · "));
    caption
}

/// Makes a media title usable as a file name: drops path separators, shell
/// wildcards and control characters, trims and caps the length.
///
/// ```
/// use clipfetch::core::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("AC/DC: Live?"), "ACDC Live");
/// assert_eq!(sanitize_filename("  "), "");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !['/', '\\', ':', '*', '?', '"', '<', '>', '|'].contains(c))
        .filter(|c| !c.is_control())
        .collect();
    truncate_chars(cleaned.trim(), 120).trim_end_matches('.').to_string()
}
