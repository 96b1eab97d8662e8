use std::collections::HashMap;
use std::ops::Range;

use bluebridge_shared::models::Attachment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Object replacement character the platform puts where an inline
/// attachment is rendered.
const OBJECT_REPLACEMENT: char = '\u{fffc}';

/// Attribute names the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKey {
    BaseWritingDirection,
    FileTransferGuid,
    MessagePart,
    DataDetected,
    Link,
}

impl AttributeKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseWritingDirection => "__kIMBaseWritingDirectionAttributeName",
            Self::FileTransferGuid => "__kIMFileTransferGUIDAttributeName",
            Self::MessagePart => "__kIMMessagePartAttributeName",
            Self::DataDetected => "__kIMDataDetectedAttributeName",
            Self::Link => "__kIMLinkAttributeName",
        }
    }
}

/// A property applying to `length` UTF-16 code units of the content,
/// starting at `location`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub location: usize,
    pub length: usize,
    #[serde(default)]
    pub values: HashMap<String, Value>,
}

impl Attribute {
    pub fn get(&self, key: AttributeKey) -> Option<&Value> {
        self.values.get(key.as_str())
    }

    /// Guid of the inline attachment this span renders.
    pub fn file_transfer_guid(&self) -> Option<&str> {
        self.get(AttributeKey::FileTransferGuid)?.as_str()
    }

    /// Index of the message part this span belongs to.
    pub fn part_index(&self) -> Option<i64> {
        self.get(AttributeKey::MessagePart)?.as_i64()
    }

    pub fn writing_direction(&self) -> Option<i64> {
        self.get(AttributeKey::BaseWritingDirection)?.as_i64()
    }
}

/// Decoded rich-text body. Produced once per archive and never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributedString {
    content: String,
    #[serde(default)]
    attributes: Vec<Attribute>,
}

impl AttributedString {
    pub fn new(content: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            content: content.into(),
            attributes,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Text covered by `attr`, or `None` if its range does not fall on
    /// character boundaries inside the content.
    pub fn text_of(&self, attr: &Attribute) -> Option<&str> {
        utf16_to_byte_range(&self.content, attr.location, attr.length).map(|r| &self.content[r])
    }

    /// Each overlay paired with the text it covers, in overlay order.
    /// Overlays with an invalid range are skipped.
    pub fn runs(&self) -> impl Iterator<Item = (&str, &Attribute)> + '_ {
        self.attributes
            .iter()
            .filter_map(move |attr| self.text_of(attr).map(|text| (text, attr)))
    }

    /// Content with inline attachment placeholders removed.
    pub fn plain_text(&self) -> String {
        self.content
            .chars()
            .filter(|&c| c != OBJECT_REPLACEMENT)
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Order `attachments` the way they appear in the text.
    ///
    /// The order of file-reference overlays is authoritative. Attachments no
    /// overlay references are dropped, and references to unknown
    /// attachments are logged and skipped.
    pub fn sort_attachments<'a>(&self, attachments: &'a [Attachment]) -> Vec<&'a Attachment> {
        let by_guid: HashMap<&str, &Attachment> = attachments
            .iter()
            .map(|attachment| (attachment.guid.as_str(), attachment))
            .collect();

        let mut output = Vec::with_capacity(attachments.len());
        for guid in self.attributes.iter().filter_map(Attribute::file_transfer_guid) {
            match by_guid.get(guid) {
                Some(attachment) => output.push(*attachment),
                None => warn!(guid = %guid, "Didn't find attachment referenced in message"),
            }
        }

        if output.len() < attachments.len() {
            debug!(
                referenced = output.len(),
                supplied = attachments.len(),
                "Dropping attachments not referenced in message text"
            );
        }
        output
    }
}

/// Convert a UTF-16 `(location, length)` range to a byte range of `content`.
fn utf16_to_byte_range(content: &str, location: usize, length: usize) -> Option<Range<usize>> {
    let end = location.checked_add(length)?;
    let mut start_byte = None;
    let mut units = 0;

    let boundaries = content
        .char_indices()
        .chain(std::iter::once((content.len(), '\0')));
    for (idx, ch) in boundaries {
        if units == location && start_byte.is_none() {
            start_byte = Some(idx);
        }
        if units == end {
            return start_byte.map(|start| start..idx);
        }
        if units > end {
            return None;
        }
        units += ch.len_utf16();
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn attachment(guid: &str) -> Attachment {
        Attachment {
            guid: guid.to_string(),
            path_on_disk: format!("/tmp/{guid}"),
            ..Default::default()
        }
    }

    fn file_ref(location: usize, guid: &str) -> Attribute {
        Attribute {
            location,
            length: 1,
            values: HashMap::from([(
                AttributeKey::FileTransferGuid.as_str().to_string(),
                json!(guid),
            )]),
        }
    }

    #[test]
    fn test_sort_follows_overlay_order() {
        let text = AttributedString::new(
            "\u{fffc}\u{fffc}\u{fffc}",
            vec![file_ref(0, "f2"), file_ref(1, "f1"), file_ref(2, "f3")],
        );
        let supplied = [attachment("f3"), attachment("f1"), attachment("f2")];

        let sorted: Vec<&str> = text
            .sort_attachments(&supplied)
            .into_iter()
            .map(|a| a.guid.as_str())
            .collect();
        assert_eq!(sorted, vec!["f2", "f1", "f3"]);
    }

    #[test]
    fn test_sort_drops_unreferenced_and_skips_unknown() {
        let text = AttributedString::new(
            "\u{fffc}\u{fffc}\u{fffc}",
            vec![file_ref(0, "f2"), file_ref(1, "f5"), file_ref(2, "f1")],
        );
        let supplied = [attachment("f1"), attachment("f4"), attachment("f2")];

        let sorted: Vec<&str> = text
            .sort_attachments(&supplied)
            .into_iter()
            .map(|a| a.guid.as_str())
            .collect();
        assert_eq!(sorted, vec!["f2", "f1"]);
    }

    #[test]
    fn test_sort_ignores_non_file_overlays() {
        let mut link = Attribute {
            location: 0,
            length: 4,
            ..Default::default()
        };
        link.values
            .insert(AttributeKey::Link.as_str().into(), json!("https://example.org"));
        let text = AttributedString::new("link\u{fffc}", vec![link, file_ref(4, "f1")]);

        let supplied = [attachment("f1")];
        assert_eq!(text.sort_attachments(&supplied), vec![&supplied[0]]);
    }

    #[test]
    fn test_runs_use_utf16_offsets() {
        let mut part = Attribute {
            location: 6,
            length: 5,
            ..Default::default()
        };
        part.values
            .insert(AttributeKey::MessagePart.as_str().into(), json!(0));
        let whole = Attribute {
            location: 0,
            length: 11,
            ..Default::default()
        };
        let text = AttributedString::new("Hi \u{1f44b} there", vec![whole, part]);

        let runs: Vec<(&str, Option<i64>)> = text
            .runs()
            .map(|(run, attr)| (run, attr.part_index()))
            .collect();
        assert_eq!(runs, vec![("Hi \u{1f44b} there", None), ("there", Some(0))]);
    }

    #[test]
    fn test_runs_skip_invalid_ranges() {
        let inside_surrogate = Attribute {
            location: 1,
            length: 1,
            ..Default::default()
        };
        let past_end = Attribute {
            location: 1,
            length: 10,
            ..Default::default()
        };
        let text = AttributedString::new("\u{1f44b}", vec![inside_surrogate, past_end]);
        assert_eq!(text.runs().count(), 0);
    }

    #[test]
    fn test_plain_text_strips_placeholders() {
        let text = AttributedString::new("\u{fffc}look at this", Vec::new());
        assert_eq!(text.plain_text(), "look at this");
    }

    #[test]
    fn test_deserialize_delegate_shape() {
        let parsed: AttributedString = serde_json::from_value(json!({
            "content": "hello",
            "attributes": [
                {"location": 0, "length": 5, "values": {
                    "__kIMMessagePartAttributeName": 0,
                    "__kIMBaseWritingDirectionAttributeName": -1
                }}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.content(), "hello");
        assert_eq!(parsed.attributes()[0].part_index(), Some(0));
        assert_eq!(parsed.attributes()[0].writing_direction(), Some(-1));
    }
}
