use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelpTopic {
    TextName,
    TextLanguage,
    SelectFiles,
}

impl HelpTopic {
    pub const ALL: [HelpTopic; 3] = [
        HelpTopic::TextName,
        HelpTopic::TextLanguage,
        HelpTopic::SelectFiles,
    ];

    pub fn key(self) -> &'static str {
        match self {
            HelpTopic::TextName => "text_name",
            HelpTopic::TextLanguage => "text_language",
            HelpTopic::SelectFiles => "select_files",
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            HelpTopic::TextName => {
                "Set here the name (title) of the text you are going to collate."
            }
            HelpTopic::TextLanguage => {
                "Set the language of the text.  This is used to optimize collation results."
            }
            HelpTopic::SelectFiles => {
                "Add the files that contain your text; each file is uploaded and registered \
                 as one witness.  These may be in plaintext format or in TEI XML format.  \
                 See the instructions for more information on TEI formatting guidelines."
            }
        }
    }
}

impl fmt::Display for HelpTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown help topic '{0}'")]
pub struct UnknownHelpTopic(pub String);

impl FromStr for HelpTopic {
    type Err = UnknownHelpTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HelpTopic::ALL
            .into_iter()
            .find(|topic| topic.key() == s.trim())
            .ok_or_else(|| UnknownHelpTopic(s.to_string()))
    }
}
