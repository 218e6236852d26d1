use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expression {
    key: String,
    operator: Operator,
    #[serde(default)]
    values: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects objects by their labels.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid label selector {selector:?}: {reason}")]
pub struct ParseError {
    selector: String,
    reason: &'static str,
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().map_or(true, |m| m.is_empty())
            && self.match_expressions.as_ref().map_or(true, |e| e.is_empty())
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_map(labels.as_ref())
    }

    pub fn matches_map(&self, labels: &Map) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }
}

impl std::str::FromStr for Selector {
    type Err = ParseError;

    /// Parses the selector syntax accepted by the Kubernetes API, e.g.
    /// `app=web,tier in (a,b),!legacy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| ParseError {
            selector: s.to_string(),
            reason,
        };

        let mut match_labels = Map::new();
        let mut exprs = Expressions::new();
        for req in split_requirements(s).map_err(error)? {
            if let Some(key) = req.strip_prefix('!') {
                exprs.push(Expression::new(key.trim(), Operator::DoesNotExist, None)?);
            } else if let Some((key, values)) = split_set(req, " notin ") {
                exprs.push(Expression::new(key, Operator::NotIn, Some(parse_set(values)?))?);
            } else if let Some((key, values)) = split_set(req, " in ") {
                exprs.push(Expression::new(key, Operator::In, Some(parse_set(values)?))?);
            } else if let Some((key, value)) = req.split_once("!=") {
                let values = Some(value.trim().to_string()).into_iter().collect();
                exprs.push(Expression::new(key.trim(), Operator::NotIn, Some(values))?);
            } else if let Some((key, value)) =
                req.split_once("==").or_else(|| req.split_once('='))
            {
                let key = key.trim();
                if key.is_empty() {
                    return Err(error("missing key"));
                }
                match_labels.insert(key.to_string(), value.trim().to_string());
            } else {
                exprs.push(Expression::new(req, Operator::Exists, None)?);
            }
        }

        Ok(Self {
            match_labels: Some(match_labels).filter(|m| !m.is_empty()),
            match_expressions: Some(exprs).filter(|e| !e.is_empty()),
        })
    }
}

impl fmt::Display for Selector {
    /// Formats the selector in the syntax accepted by the Kubernetes API.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !std::mem::take(&mut first) {
                f.write_str(",")?;
            }
            Ok(())
        };

        for (k, v) in self.match_labels.iter().flatten() {
            sep(f)?;
            write!(f, "{k}={v}")?;
        }

        for expr in self.match_expressions.iter().flatten() {
            sep(f)?;
            let values = expr.values.iter().cloned().collect::<Vec<_>>().join(",");
            match expr.operator {
                Operator::In => write!(f, "{} in ({values})", expr.key)?,
                Operator::NotIn => write!(f, "{} notin ({values})", expr.key)?,
                Operator::Exists => write!(f, "{}", expr.key)?,
                Operator::DoesNotExist => write!(f, "!{}", expr.key)?,
            }
        }

        Ok(())
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

/// Splits a selector on the commas that separate requirements, ignoring the
/// commas inside `in (...)` sets.
fn split_requirements(s: &str) -> Result<Vec<&str>, &'static str> {
    let mut reqs = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or("unbalanced parentheses")?,
            ',' if depth == 0 => {
                reqs.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced parentheses");
    }
    reqs.push(&s[start..]);

    Ok(reqs
        .into_iter()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect())
}

fn split_set<'s>(req: &'s str, op: &str) -> Option<(&'s str, &'s str)> {
    let (key, values) = req.split_once(op)?;
    Some((key.trim(), values.trim()))
}

fn parse_set(values: &str) -> Result<BTreeSet<String>, ParseError> {
    let inner = values
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| ParseError {
            selector: values.to_string(),
            reason: "set values must be enclosed in parentheses",
        })?;
    Ok(inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect())
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    fn new(
        key: &str,
        operator: Operator,
        values: Option<BTreeSet<String>>,
    ) -> Result<Self, ParseError> {
        if key.is_empty() {
            return Err(ParseError {
                selector: key.to_string(),
                reason: "missing key",
            });
        }
        Ok(Self {
            key: key.to_string(),
            operator,
            values: values.unwrap_or_default(),
        })
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map_or(false, |v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "label mismatch",
            ),
            (
                Selector::from_iter(Some(Expression {
                    key: "foo".into(),
                    operator: Operator::In,
                    values: Some("bar".to_string()).into_iter().collect(),
                })),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(Expression {
                    key: "foo".into(),
                    operator: Operator::NotIn,
                    values: Some("bar".to_string()).into_iter().collect(),
                })),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "notin excludes listed value",
            ),
            (
                Selector::from_iter(Some(Expression {
                    key: "foo".into(),
                    operator: Operator::NotIn,
                    values: Some("bar".to_string()).into_iter().collect(),
                })),
                Labels::default(),
                true,
                "notin matches missing key",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn parse_selectors() {
        let labels = Labels::from_iter(vec![("replicate", "true"), ("tier", "web")]);
        for (input, matches) in [
            ("", true),
            ("replicate=true", true),
            ("replicate==true", true),
            ("replicate=false", false),
            ("replicate!=false", true),
            ("tier in (web, api)", true),
            ("tier notin (web)", false),
            ("replicate,tier", true),
            ("!legacy", true),
            ("!tier", false),
            ("replicate=true, tier in (api,db)", false),
        ] {
            let selector = input.parse::<Selector>().expect("selector must parse");
            assert_eq!(selector.matches(&labels), matches, "{input}");
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("tier in (web".parse::<Selector>().is_err());
        assert!("tier in web".parse::<Selector>().is_err());
        assert!("=true".parse::<Selector>().is_err());
    }

    #[test]
    fn display_roundtrips() {
        let selector = "replicate=true,tier in (api,web),!legacy"
            .parse::<Selector>()
            .unwrap();
        let reparsed = selector.to_string().parse::<Selector>().unwrap();
        assert_eq!(selector, reparsed);
        assert_eq!(selector.to_string(), "replicate=true,tier in (api,web),!legacy");
    }
}
