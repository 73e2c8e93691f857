use serenity::model::id::UserId;

/// How the bot recognizes messages directed at it
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
}

impl Identity {
    /// If `content` is addressed to the bot, return the rest of the message
    ///
    /// A message is addressed if it starts with a mention of the bot or with
    /// the bot's name followed by `:` or `,`.
    pub fn strip<'a>(&self, content: &'a str) -> Option<&'a str> {
        let content = content.trim_start();
        let id = self.id.get();

        let rest = [format!("<@{id}>"), format!("<@!{id}>")]
            .iter()
            .find_map(|m| content.strip_prefix(m.as_str()))
            .map(|r| r.strip_prefix([':', ',']).unwrap_or(r))
            .or_else(|| self.strip_name(content))?;

        Some(rest.trim_start())
    }

    fn strip_name<'a>(&self, content: &'a str) -> Option<&'a str> {
        let head = content.get(..self.name.len())?;

        if self.name.is_empty() || !head.eq_ignore_ascii_case(&self.name) {
            return None;
        }

        content[head.len()..].strip_prefix([':', ','])
    }
}
