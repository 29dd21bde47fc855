use std::fmt;

use crate::error::DriverError;

/// Parsed form of a handler reference such as `handlers/hero@resolvers.hero`
/// or `function.fnname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReference {
    raw: String,
    /// Importable path or module name, without extension.
    pub module: String,
    /// Dotted export path inside the module, if one was given.
    pub export_path: Option<Vec<String>>,
}

impl HandlerReference {
    pub fn parse(raw: &str) -> Result<Self, DriverError> {
        if raw.is_empty() {
            return Err(DriverError::EmptyFunctionName);
        }

        let (module, export) = match last_unescaped_at(raw) {
            Some(idx) => (raw[..idx].replace("\\@", "@"), Some(raw[idx + 1..].to_string())),
            None => {
                let unescaped = raw.replace("\\@", "@");
                let base_start = unescaped.rfind('/').map(|i| i + 1).unwrap_or(0);
                match unescaped[base_start..].find('.') {
                    Some(dot) if dot > 0 => {
                        let split = base_start + dot;
                        (unescaped[..split].to_string(), Some(unescaped[split + 1..].to_string()))
                    }
                    _ => (unescaped, None),
                }
            }
        };

        if module.is_empty() {
            return Err(DriverError::EmptyFunctionName);
        }

        let export_path = export
            .map(|e| e.split('.').filter(|s| !s.is_empty()).map(str::to_string).collect::<Vec<_>>())
            .filter(|segments| !segments.is_empty());

        Ok(Self {
            raw: raw.to_string(),
            module,
            export_path,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// First path segment of the module, used for module-root search.
    pub fn package(&self) -> &str {
        self.module
            .trim_start_matches("./")
            .split('/')
            .next()
            .unwrap_or_default()
    }

    /// Path inside the package, `None` when the reference names the package itself.
    pub fn package_subpath(&self) -> Option<&str> {
        self.module
            .trim_start_matches("./")
            .split_once('/')
            .map(|(_, rest)| rest)
            .filter(|rest| !rest.is_empty())
    }

    pub fn export_segments(&self) -> Option<Vec<&str>> {
        self.export_path
            .as_ref()
            .map(|p| p.iter().map(String::as_str).collect())
    }
}

impl fmt::Display for HandlerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn last_unescaped_at(raw: &str) -> Option<usize> {
    raw.match_indices('@')
        .map(|(idx, _)| idx)
        .filter(|&idx| idx > 0 && !raw[..idx].ends_with('\\'))
        .last()
}
