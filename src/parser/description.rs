//! Review body reconstruction.
//!
//! The description container embeds ad widgets and inline markup that a
//! selector's text content flattens badly, so the body is rebuilt by a
//! small scanner over the container's serialized markup. The scanner has
//! two working states plus a terminal one and reacts to a closed table of
//! markers; new site revisions only add rows to [`MARKERS`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Skipping,
    Writing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    /// Start a paragraph: newline if text precedes, then write.
    Paragraph,
    /// Stop writing until the next content marker.
    ParagraphEnd,
    LineBreak,
    /// Back to writing after an embedded block.
    Resume,
    /// Formatting tag inside text; state is kept.
    Inline,
    /// Character entity, emitted only while writing.
    Entity(char),
    /// Nothing after this belongs to the review body.
    End,
}

/// Longest markers first where one is a prefix of another. A tag token
/// without its closing `>` also consumes the tag's attributes.
const MARKERS: &[(&str, Marker)] = &[
    ("</script>\n</div></div>", Marker::Resume),
    ("<br />", Marker::LineBreak),
    ("<br/>", Marker::LineBreak),
    ("<br>", Marker::LineBreak),
    ("<br ", Marker::LineBreak),
    ("<p>", Marker::Paragraph),
    ("<p ", Marker::Paragraph),
    ("<p\n", Marker::Paragraph),
    ("<p\t", Marker::Paragraph),
    ("</p>", Marker::ParagraphEnd),
    ("<b>", Marker::Inline),
    ("</b>", Marker::Inline),
    ("<i>", Marker::Inline),
    ("</i>", Marker::Inline),
    ("<u>", Marker::Inline),
    ("</u>", Marker::Inline),
    ("<table", Marker::End),
    ("&amp;", Marker::Entity('&')),
    ("&lt;", Marker::Entity('<')),
    ("&gt;", Marker::Entity('>')),
    ("&quot;", Marker::Entity('"')),
    ("&nbsp;", Marker::Entity(' ')),
];

/// Rebuild the description text from the container's outer markup.
///
/// Everything up to the end of the container's opening tag is skipped.
/// Text is written with `<br>` turned into newlines; any unrecognised tag
/// pauses writing until a paragraph or resume marker. Trailing text with
/// no closing tag is kept.
pub fn reconstruct(fragment: &str) -> String {
    let mut out = String::new();
    let mut state = State::Skipping;
    let mut rest = fragment;

    // Container opening tag: `<div ... itemprop="description">`
    if rest.starts_with('<') {
        match rest.find('>') {
            Some(pos) => {
                rest = &rest[pos + 1..];
                state = State::Writing;
            }
            None => return String::new(),
        }
    } else {
        state = State::Writing;
    }

    while state != State::Done {
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if let Some((token, marker)) = MARKERS.iter().find(|(t, _)| rest.starts_with(t)) {
            rest = &rest[token.len()..];
            if token.starts_with('<') && !token.ends_with('>') && *marker != Marker::End {
                rest = rest.find('>').map_or("", |pos| &rest[pos + 1..]);
            }
            match *marker {
                Marker::Paragraph => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    state = State::Writing;
                }
                Marker::ParagraphEnd => state = State::Skipping,
                Marker::LineBreak => out.push('\n'),
                Marker::Resume => state = State::Writing,
                Marker::Inline => {}
                Marker::Entity(c) => {
                    if state == State::Writing {
                        out.push(c);
                    }
                }
                Marker::End => state = State::Done,
            }
            continue;
        }

        if ch == '<' {
            state = State::Skipping;
        } else if state == State::Writing {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }

    out.trim().to_string()
}

/// Decode the handful of entities a serializer emits in text nodes.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        let entity = MARKERS.iter().find_map(|(t, m)| match m {
            Marker::Entity(c) if rest.starts_with(t) => Some((t.len(), *c)),
            _ => None,
        });
        match entity {
            Some((len, c)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn br_becomes_newline() {
        let html = r#"<div class="review-body description" itemprop="description">Заказываю часто.<br>Доставка быстрая.<br>Рекомендую.</div>"#;
        assert_eq!(
            reconstruct(html),
            "Заказываю часто.\nДоставка быстрая.\nРекомендую."
        );
    }

    #[test]
    fn resumes_after_embedded_widget() {
        let html = "<div itemprop=\"description\">Начало отзыва.<br><div class=\"ad\"><div><script>var a = 1 < 2;</script>\n</div></div>Продолжение отзыва.</div>";
        assert_eq!(reconstruct(html), "Начало отзыва.\nПродолжение отзыва.");
    }

    #[test]
    fn paragraphs_are_separated() {
        let html = r#"<div itemprop="description"><p>Первый абзац.</p><p>Второй<br>абзац.</p></div>"#;
        assert_eq!(reconstruct(html), "Первый абзац.\nВторой\nабзац.");
    }

    #[test]
    fn paragraphs_with_attributes_are_written() {
        let html = r#"<div itemprop="description"><p class="lead">Первый абзац.</p><p style="x">Второй<br class="z">абзац.</p></div>"#;
        assert_eq!(reconstruct(html), "Первый абзац.\nВторой\nабзац.");
    }

    #[test]
    fn tag_starting_with_p_is_not_a_paragraph() {
        let html = r#"<div itemprop="description">Текст<pre>код</pre></div>"#;
        assert_eq!(reconstruct(html), "Текст");
    }

    #[test]
    fn inline_markup_keeps_text() {
        let html = r#"<div itemprop="description">Очень <b>плохо</b> упаковано &amp; долго.</div>"#;
        assert_eq!(reconstruct(html), "Очень плохо упаковано & долго.");
    }

    #[test]
    fn unknown_tag_pauses_writing() {
        let html = r#"<div itemprop="description">Текст<span class="hidden">скрыто</span></div>"#;
        assert_eq!(reconstruct(html), "Текст");
    }

    #[test]
    fn keeps_unterminated_tail() {
        let html = r#"<div itemprop="description">Первая строка<br>последняя строка"#;
        assert_eq!(reconstruct(html), "Первая строка\nпоследняя строка");
    }

    #[test]
    fn stops_at_end_marker() {
        let html = r#"<div itemprop="description">Отзыв<table><tr><td>Стоимость:</td></tr></table>"#;
        assert_eq!(reconstruct(html), "Отзыв");
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(decode_entities("a &lt;b&gt; &amp;&nbsp;c"), "a <b> & c");
        assert_eq!(decode_entities("без сущностей"), "без сущностей");
    }
}
