/// Append `s` to `out`, replacing the characters that are special in
/// HTML text and attribute values.
pub fn html_escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c)
        }
    }
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    html_escape_into(&mut out, s);
    out
}

#[cfg(test)]
#[test]
fn t_html_escape() {
    assert_eq!(html_escape("a<b & \"c\">'d'"),
               "a&lt;b &amp; &quot;c&quot;&gt;&#39;d&#39;");
    assert_eq!(html_escape("plain"), "plain");
}
