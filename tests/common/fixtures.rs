//! Archive and detail page markup for the mock picture site

/// One line of the archive index
pub struct ArchiveEntry {
    /// Date as printed on the index, e.g. "2013 August 23"
    pub date: &'static str,
    /// Detail page file name, e.g. "ap130823.html"
    pub page: &'static str,
    /// Entry title
    pub title: &'static str,
}

impl ArchiveEntry {
    pub const fn new(date: &'static str, page: &'static str, title: &'static str) -> Self {
        Self { date, page, title }
    }
}

/// Archive index page listing `entries` in order
pub fn archive_page(entries: &[ArchiveEntry]) -> String {
    let mut body = String::from("<html>\n<head><title>Archive</title></head>\n<body>\n<b>\n");
    for entry in entries {
        body.push_str(&format!(
            "{}:  <a href=\"{}\">{}</a><br>\n",
            entry.date, entry.page, entry.title
        ));
    }
    body.push_str("</b>\n</body>\n</html>\n");
    body
}

/// Detail page embedding one image at `src`
pub fn detail_with_image(src: &str) -> String {
    format!(
        "<html><body><center>\n<a href=\"{src}\">\n<IMG SRC=\"{src}\"\nalt=\"picture\" style=\"max-width:100%\"></a>\n</center></body></html>"
    )
}

/// Detail page with a video instead of an image
pub fn detail_without_image() -> String {
    r#"<html><body><center>
<iframe width="960" height="540" src="https://www.youtube.com/embed/abc"></iframe>
</center></body></html>"#
        .to_string()
}
