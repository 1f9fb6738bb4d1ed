use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Param(String),
}

/// 端点路径模板，例如 `/chat/{room}`。
///
/// 参数占位符由花括号包围，每个参数必须占据完整的路径段。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let raw = value.into();
        if !raw.starts_with('/') {
            return Err(DomainError::PathTemplateNotAbsolute(raw));
        }

        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        for part in split_segments(&raw) {
            let segment = if let Some(inner) = part.strip_prefix('{') {
                let name = inner.strip_suffix('}').unwrap_or_default();
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(DomainError::MalformedPathSegment {
                        template: raw.clone(),
                        segment: part.to_string(),
                    });
                }
                if !seen.insert(name.to_string()) {
                    return Err(DomainError::DuplicatePathParam {
                        template: raw.clone(),
                        name: name.to_string(),
                    });
                }
                Segment::Param(name.to_string())
            } else if part.contains(['{', '}']) {
                return Err(DomainError::MalformedPathSegment {
                    template: raw.clone(),
                    segment: part.to_string(),
                });
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 模板声明的参数名，按出现顺序。
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// 字面量段的数量，多个模板同时匹配时数值越大越优先。
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }

    /// 两个模板是否匹配完全相同的路径集合：字面量逐段相同，参数段不论名称。
    pub fn same_shape(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }

    /// 匹配实际请求路径，成功时返回解析出的路径参数。
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = split_segments(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
}

/// 从请求路径解析出的路径参数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(BTreeMap<String, String>);

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
