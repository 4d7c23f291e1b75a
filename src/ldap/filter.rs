//! Search filter templates.
//!
//! Operators write filters such as
//! `(&(memberOf={{.Group}})(|(mail={{.Login}})(uid={{.Login}})))`.
//! Placeholders are replaced by escaped values, so user input can never add
//! new filter components.

use ldap3::ldap_escape;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Error raised while parsing or rendering a filter template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),
    #[error("empty action at byte {0}")]
    Empty(usize),
    #[error("unknown placeholder `{0}`, expected `.Login` or `.Group`")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Login,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Field(Field),
}

/// Parsed filter template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTemplate<'a> {
    segments: Vec<Segment<'a>>,
}

impl<'a> FilterTemplate<'a> {
    /// Parse a template.
    pub fn parse(template: &'a str) -> Result<Self, FilterError> {
        let mut segments = Vec::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(&rest[..start]));
            }

            let action = &rest[start + OPEN.len()..];
            let end = action
                .find(CLOSE)
                .ok_or(FilterError::Unclosed(offset + start))?;

            let field = match action[..end].trim() {
                "" => return Err(FilterError::Empty(offset + start)),
                ".Login" => Field::Login,
                ".Group" => Field::Group,
                other => return Err(FilterError::UnknownField(other.into())),
            };
            segments.push(Segment::Field(field));

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest));
        }

        Ok(Self { segments })
    }

    /// Substitute `login` and `group`, both escaped for filter values.
    pub fn render(&self, login: &str, group: &str) -> String {
        let login = ldap_escape(login);
        let group = ldap_escape(group);

        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => *text,
                Segment::Field(Field::Login) => login.as_ref(),
                Segment::Field(Field::Group) => group.as_ref(),
            })
            .collect()
    }
}

/// Parse and render `template` in one step.
pub fn render(
    template: &str,
    login: &str,
    group: &str,
) -> Result<String, FilterError> {
    Ok(FilterTemplate::parse(template)?.render(login, group))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "(&(memberOf={{.Group}})(mail={{.Login}}))";
    const OWNERS: &str = "cn=owners,ou=group,dc=example,dc=org";

    #[test]
    fn test_render() {
        assert_eq!(
            render(TEMPLATE, "alice", OWNERS).unwrap(),
            "(&(memberOf=cn=owners,ou=group,dc=example,dc=org)(mail=alice))"
        );
    }

    #[test]
    fn test_render_repeated_and_spaced_placeholders() {
        let template =
            "(&(memberOf={{ .Group }})(|(mail={{.Login}})(uid={{  .Login}})))";

        assert_eq!(
            render(template, "bob", OWNERS).unwrap(),
            "(&(memberOf=cn=owners,ou=group,dc=example,dc=org)(|(mail=bob)(uid=bob)))"
        );
    }

    #[test]
    fn test_render_escapes_injection() {
        let filter = render(TEMPLATE, "*)(uid=*", OWNERS).unwrap();

        assert_eq!(
            filter,
            r"(&(memberOf=cn=owners,ou=group,dc=example,dc=org)(mail=\2a\29\28uid=\2a))"
        );
        // Structure is untouched: same number of parentheses as with a
        // harmless login.
        let plain = render(TEMPLATE, "alice", OWNERS).unwrap();
        assert_eq!(
            filter.matches(['(', ')']).count(),
            plain.matches(['(', ')']).count()
        );
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(
            render("(objectClass=person)", "alice", OWNERS).unwrap(),
            "(objectClass=person)"
        );
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(
            render(TEMPLATE, "alice", "").unwrap(),
            "(&(memberOf=)(mail=alice))"
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(
            FilterTemplate::parse("(mail={{.Login)"),
            Err(FilterError::Unclosed(6))
        );
        assert_eq!(
            FilterTemplate::parse("(mail={{ }})"),
            Err(FilterError::Empty(6))
        );
        assert_eq!(
            FilterTemplate::parse("(mail={{.Email}})"),
            Err(FilterError::UnknownField(".Email".into()))
        );
    }
}
