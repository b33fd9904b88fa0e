use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Question and option text may arrive as rich text from the authoring UI.
/// Whitelist-based sanitization keeps safe formatting tags (<b>, <p>, lists)
/// while stripping <script>, <iframe> and event-handler attributes, so stored
/// question content can never carry Stored XSS to exam takers.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
