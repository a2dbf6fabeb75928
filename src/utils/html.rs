// src/utils/html.rs

/// Whitelist sanitizing with ammonia: safe tags (<b>, <p>, <sub>) survive,
/// <script>/<iframe> and event attributes are stripped. Applied to
/// admin-authored question text, options and explanations before storage.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_handlers() {
        assert_eq!(clean_html("H<sub>2</sub>O<script>x()</script>"), "H<sub>2</sub>O");
        assert_eq!(clean_html(r#"<p onclick="x()">hi</p>"#), "<p>hi</p>");
    }
}
