//! The fixed registry of message content kinds the relay understands.

/// Closed set of content kinds the relay tracks and can redeliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Document,
    Animation,
    Voice,
    Audio,
    Sticker,
    Location,
    Contact,
}

/// Static metadata for one content kind.
#[derive(Debug, Clone, Copy)]
pub struct ContentDescriptor {
    pub emoji: &'static str,
    pub label: &'static str,
    pub has_caption: bool,
}

/// Display string used for an edit whose prior state was never captured.
pub const UNKNOWN_DISPLAY: &str = "[unknown] ?";

impl ContentKind {
    pub const ALL: [ContentKind; 10] = [
        ContentKind::Text,
        ContentKind::Photo,
        ContentKind::Video,
        ContentKind::Document,
        ContentKind::Animation,
        ContentKind::Voice,
        ContentKind::Audio,
        ContentKind::Sticker,
        ContentKind::Location,
        ContentKind::Contact,
    ];

    pub fn descriptor(self) -> &'static ContentDescriptor {
        match self {
            ContentKind::Text => &ContentDescriptor {
                emoji: "📝",
                label: "Message",
                has_caption: false,
            },
            ContentKind::Photo => &ContentDescriptor {
                emoji: "🖼️",
                label: "Photo",
                has_caption: true,
            },
            ContentKind::Video => &ContentDescriptor {
                emoji: "🎥",
                label: "Video",
                has_caption: true,
            },
            ContentKind::Document => &ContentDescriptor {
                emoji: "📄",
                label: "Document",
                has_caption: true,
            },
            ContentKind::Animation => &ContentDescriptor {
                emoji: "🎬",
                label: "Animation",
                has_caption: true,
            },
            ContentKind::Voice => &ContentDescriptor {
                emoji: "🎤",
                label: "Voice message",
                has_caption: false,
            },
            ContentKind::Audio => &ContentDescriptor {
                emoji: "🎵",
                label: "Audio",
                has_caption: false,
            },
            ContentKind::Sticker => &ContentDescriptor {
                emoji: "🩷",
                label: "Sticker",
                has_caption: false,
            },
            ContentKind::Location => &ContentDescriptor {
                emoji: "📍",
                label: "Location",
                has_caption: false,
            },
            ContentKind::Contact => &ContentDescriptor {
                emoji: "👤",
                label: "Contact",
                has_caption: false,
            },
        }
    }

    /// Symbolic tag used in callback data and logs.
    pub fn tag(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Photo => "photo",
            ContentKind::Video => "video",
            ContentKind::Document => "document",
            ContentKind::Animation => "animation",
            ContentKind::Voice => "voice",
            ContentKind::Audio => "audio",
            ContentKind::Sticker => "sticker",
            ContentKind::Location => "location",
            ContentKind::Contact => "contact",
        }
    }

    pub fn from_tag(tag: &str) -> Option<ContentKind> {
        ContentKind::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn has_caption(self) -> bool {
        self.descriptor().has_caption
    }

    /// Kinds whose payload is already human-readable text and is sent as a
    /// plain message rather than a media upload.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            ContentKind::Text | ContentKind::Location | ContentKind::Contact
        )
    }
}

/// Last observed state of one message: its kind, a comparable payload
/// (text, or a file id for media kinds) and an optional caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub kind: ContentKind,
    pub payload: String,
    pub caption: Option<String>,
}

impl Snapshot {
    pub fn new(kind: ContentKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        // Empty captions are treated as absent.
        self.caption = caption.filter(|c| !c.is_empty());
        self
    }

    /// Human-readable rendition used in edit notifications and broadcast
    /// previews. Textual kinds show the payload verbatim; media kinds show
    /// their emoji/label, plus the caption when one was captured.
    pub fn display(&self) -> String {
        if self.kind.is_textual() {
            return self.payload.clone();
        }
        let desc = self.kind.descriptor();
        let mut display = format!("{} {}", desc.emoji, desc.label);
        if desc.has_caption {
            if let Some(caption) = &self.caption {
                display.push_str("\n\nCaption: ");
                display.push_str(caption);
            }
        }
        display
    }
}
