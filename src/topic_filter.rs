use std::fmt;

use regex::{escape, Regex};
use snafu::{ResultExt, Snafu};

use crate::proto::MAX_STRING_LENGTH;

lazy_static! {
    static ref VALIDATOR: Regex = Regex::new(r"^(([^/\+#]*|\+)/)*([^/\+#]*|#|\+)?$").unwrap();
}

static SINGLE_WILDCARD_RE: &str = "([^/]*)";
static MULTI_WILDCARD_RE: &str = "(/.*)?";

#[derive(Snafu, Debug, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Topic filter cannot be empty."))]
    EmptyTopicFilter,
    #[snafu(display("Invalid topic filter '{}'.", filter))]
    InvalidTopicFilter { filter: String },
    #[snafu(display("Unable to compile topic filter '{}': {}", filter, source))]
    CompilationError {
        filter: String,
        source: regex::Error,
    },
}

fn is_valid_length(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= MAX_STRING_LENGTH && !topic.contains('\0')
}

/// Checks a topic filter used in SUBSCRIBE and UNSUBSCRIBE requests.
///
/// `+` must fill a whole level and `#` must be the last level. A filter may start with either wildcard.
pub fn is_valid_subscribe_topic(topic: &str) -> bool {
    is_valid_length(topic) && VALIDATOR.is_match(topic)
}

/// Checks a topic name used in PUBLISH packets. Topic names cannot contain wildcards.
pub fn is_valid_publish_topic(topic: &str) -> bool {
    is_valid_length(topic) && !topic.contains(|c| c == '+' || c == '#')
}

/// A compiled subscription filter that can be matched against topic names.
#[derive(Debug)]
pub struct TopicFilter {
    filter: String,
    matcher: Regex,
}

impl TopicFilter {
    pub fn new(s: &str) -> Result<TopicFilter, Error> {
        ensure!(!s.is_empty(), EmptyTopicFilterSnafu);
        ensure!(
            is_valid_subscribe_topic(s),
            InvalidTopicFilterSnafu { filter: s }
        );

        let mut levels: Vec<&str> = s.split('/').collect();
        let multi_level = levels.last() == Some(&"#");
        if multi_level {
            levels.pop();
        }

        let mut collect = Vec::with_capacity(levels.len());
        for level in levels {
            if level == "+" {
                collect.push(SINGLE_WILDCARD_RE.to_string());
            } else {
                collect.push(escape(level));
            }
        }

        let match_expr = match (multi_level, collect.is_empty()) {
            (true, true) => "^.*$".to_string(),
            (true, false) => format!("^{}{}$", collect.join("/"), MULTI_WILDCARD_RE),
            (false, _) => format!("^{}$", collect.join("/")),
        };
        let matcher = Regex::new(&match_expr).context(CompilationSnafu { filter: s })?;

        Ok(TopicFilter {
            filter: s.into(),
            matcher,
        })
    }

    pub fn match_topic(&self, topic: &str) -> bool {
        // Wildcards in the first level never match server topics such as "$SYS/...".
        if topic.starts_with('$') && self.filter.starts_with(|c| c == '+' || c == '#') {
            return false;
        }
        self.matcher.is_match(topic)
    }

    pub fn as_str(&self) -> &str {
        &self.filter
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_topics() {
        assert!(is_valid_subscribe_topic("sport/tennis/#"));
        assert!(is_valid_subscribe_topic("a/+/b"));
        assert!(is_valid_subscribe_topic("#"));
        assert!(is_valid_subscribe_topic("+/x"));
        assert!(!is_valid_subscribe_topic("sport/tennis#"));
        assert!(!is_valid_subscribe_topic("sport+"));
        assert!(!is_valid_subscribe_topic("a/#/b"));
        assert!(!is_valid_subscribe_topic(""));
    }

    #[test]
    fn publish_topics() {
        assert!(is_valid_publish_topic("sport/tennis"));
        assert!(is_valid_publish_topic("/leading/slash"));
        assert!(!is_valid_publish_topic("sport/+"));
        assert!(!is_valid_publish_topic("sport/#"));
        assert!(!is_valid_publish_topic(""));
        assert!(!is_valid_publish_topic("a\0b"));
        assert!(!is_valid_publish_topic(&"x".repeat(MAX_STRING_LENGTH + 1)));
    }

    #[test]
    fn invalid_topic_filter() {
        assert_eq!(
            TopicFilter::new("this/is/#/invalid").unwrap_err(),
            Error::InvalidTopicFilter {
                filter: "this/is/#/invalid".into()
            }
        );
        assert_eq!(
            TopicFilter::new("another/+wrong/one").unwrap_err(),
            Error::InvalidTopicFilter {
                filter: "another/+wrong/one".into()
            }
        );
        assert_eq!(TopicFilter::new("").unwrap_err(), Error::EmptyTopicFilter);
    }

    #[test]
    fn simple_filter() {
        let topic = "this/is/a.filter";
        let filter = TopicFilter::new(topic).unwrap();
        assert!(filter.match_topic(topic));
        assert!(!filter.match_topic("this/is/aXfilter"));
        assert!(!filter.match_topic("/this/is/a.filter"));
    }

    #[test]
    fn single_level_filter() {
        let filter = TopicFilter::new("+/multi/+/+").unwrap();
        assert!(filter.match_topic("anything/multi/foo/bar"));
        assert!(filter.match_topic("anything/multi//bar"));
        assert!(!filter.match_topic("not/multi/valid"));
    }

    #[test]
    fn multi_level_filter() {
        let filter = TopicFilter::new("sport/#").unwrap();
        assert!(filter.match_topic("sport"));
        assert!(filter.match_topic("sport/tennis/player1"));
        assert!(!filter.match_topic("sports"));

        let everything = TopicFilter::new("#").unwrap();
        assert!(everything.match_topic("a/b/c"));
        assert!(!everything.match_topic("$SYS/uptime"));
    }
}
