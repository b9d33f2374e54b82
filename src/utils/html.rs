/// Sanitizes user supplied rich text (wish descriptions) with ammonia's
/// whitelist: harmless formatting tags survive, scripts, iframes and event
/// handler attributes are stripped.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_keeps_formatting() {
        let cleaned = clean_html("<b>red</b> bike<script>alert(1)</script>");
        assert_eq!(cleaned, "<b>red</b> bike");
    }
}
