use ammonia;

/// Clean user-supplied rich text using the ammonia library.
///
/// Question bodies, explanations and notes accept arbitrary text from
/// authors; whitelist-based sanitization keeps safe markup (like <b>, <p>)
/// while stripping script tags and event-handler attributes before storage.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
