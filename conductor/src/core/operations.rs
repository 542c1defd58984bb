//! Operation registry: the only calls agent text may trigger.

use crate::core::command_parse::{CallExpr, Literal, ParseError};

/// Registered operation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateFile,
    WriteFile,
    DeletePath,
    RenamePath,
    RunProcess,
    GenerateImage,
    SetPreference,
    GetPreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Path,
    Text,
}

#[derive(Debug, Clone, Copy)]
struct Param {
    name: &'static str,
    kind: ParamKind,
    default: Option<&'static str>,
}

const fn path(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Path,
        default: None,
    }
}

const fn text(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Text,
        default: None,
    }
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::CreateFile,
        OperationKind::WriteFile,
        OperationKind::DeletePath,
        OperationKind::RenamePath,
        OperationKind::RunProcess,
        OperationKind::GenerateImage,
        OperationKind::SetPreference,
        OperationKind::GetPreference,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperationKind::CreateFile => "create_file",
            OperationKind::WriteFile => "write_file",
            OperationKind::DeletePath => "delete_path",
            OperationKind::RenamePath => "rename_path",
            OperationKind::RunProcess => "run_process",
            OperationKind::GenerateImage => "generate_image",
            OperationKind::SetPreference => "set_preference",
            OperationKind::GetPreference => "get_preference",
        }
    }

    /// Look up a call name, accepting the legacy names older prompts taught.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "create_file" => OperationKind::CreateFile,
            "write_file" | "write_to_file" => OperationKind::WriteFile,
            "delete_path" | "delete_file" => OperationKind::DeletePath,
            "rename_path" | "rename_file" => OperationKind::RenamePath,
            "run_process" | "run_command" => OperationKind::RunProcess,
            "generate_image" => OperationKind::GenerateImage,
            "set_preference" => OperationKind::SetPreference,
            "get_preference" => OperationKind::GetPreference,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_registered(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    /// Mutating operations are recorded in recent changes and dirty the project context.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            OperationKind::CreateFile
                | OperationKind::WriteFile
                | OperationKind::DeletePath
                | OperationKind::RenamePath
                | OperationKind::GenerateImage
        )
    }

    fn params(self) -> &'static [Param] {
        const CREATE: [Param; 2] = [
            path("path"),
            Param {
                name: "content",
                kind: ParamKind::Text,
                default: Some(""),
            },
        ];
        const WRITE: [Param; 2] = [path("path"), text("content")];
        const DELETE: [Param; 1] = [path("path")];
        const RENAME: [Param; 2] = [path("old"), path("new")];
        const RUN: [Param; 1] = [text("command_line")];
        const IMAGE: [Param; 2] = [path("path"), text("prompt")];
        const SET: [Param; 2] = [text("key"), text("value")];
        const GET: [Param; 1] = [text("key")];
        match self {
            OperationKind::CreateFile => &CREATE,
            OperationKind::WriteFile => &WRITE,
            OperationKind::DeletePath => &DELETE,
            OperationKind::RenamePath => &RENAME,
            OperationKind::RunProcess => &RUN,
            OperationKind::GenerateImage => &IMAGE,
            OperationKind::SetPreference => &SET,
            OperationKind::GetPreference => &GET,
        }
    }

    /// Parameter names that are sandbox paths, in declaration order.
    pub fn path_params(self) -> Vec<&'static str> {
        self.params()
            .iter()
            .filter(|p| p.kind == ParamKind::Path)
            .map(|p| p.name)
            .collect()
    }
}

/// A call bound to its operation, with arguments as text. Paths are not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateFile { path: String, content: String },
    WriteFile { path: String, content: String },
    DeletePath { path: String },
    RenamePath { old: String, new: String },
    RunProcess { command_line: String },
    GenerateImage { path: String, prompt: String },
    SetPreference { key: String, value: String },
    GetPreference { key: String },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateFile { .. } => OperationKind::CreateFile,
            Operation::WriteFile { .. } => OperationKind::WriteFile,
            Operation::DeletePath { .. } => OperationKind::DeletePath,
            Operation::RenamePath { .. } => OperationKind::RenamePath,
            Operation::RunProcess { .. } => OperationKind::RunProcess,
            Operation::GenerateImage { .. } => OperationKind::GenerateImage,
            Operation::SetPreference { .. } => OperationKind::SetPreference,
            Operation::GetPreference { .. } => OperationKind::GetPreference,
        }
    }

    /// Arguments as recorded in the recent-changes log (file bodies elided).
    pub fn change_args(&self) -> Vec<String> {
        match self {
            Operation::CreateFile { path, content } | Operation::WriteFile { path, content } => {
                vec![path.clone(), format!("<{} bytes>", content.len())]
            }
            Operation::DeletePath { path } => vec![path.clone()],
            Operation::RenamePath { old, new } => vec![old.clone(), new.clone()],
            Operation::RunProcess { command_line } => vec![command_line.clone()],
            Operation::GenerateImage { path, prompt } => vec![path.clone(), prompt.clone()],
            Operation::SetPreference { key, value } => vec![key.clone(), value.clone()],
            Operation::GetPreference { key } => vec![key.clone()],
        }
    }
}

/// Bind a parsed call to its operation, checking arity, keywords and types.
pub fn bind(call: &CallExpr) -> Result<Operation, ParseError> {
    let kind = OperationKind::from_name(&call.name).ok_or_else(|| ParseError::UnknownKeyword {
        operation: call.name.clone(),
        name: call.name.clone(),
    })?;
    let params = kind.params();
    let operation = kind.name().to_string();

    if call.args.len() > params.len() {
        return Err(ParseError::ArgumentCount {
            operation,
            expected: arity_label(params),
            got: call.args.len(),
        });
    }

    let mut slots: Vec<Option<&Literal>> = vec![None; params.len()];
    for (slot, arg) in slots.iter_mut().zip(&call.args) {
        *slot = Some(arg);
    }
    for (key, value) in &call.kwargs {
        let idx = params
            .iter()
            .position(|p| p.name == key)
            .ok_or_else(|| ParseError::UnknownKeyword {
                operation: operation.clone(),
                name: key.clone(),
            })?;
        if slots[idx].is_some() {
            return Err(ParseError::DuplicateArgument {
                operation: operation.clone(),
                name: key.clone(),
            });
        }
        slots[idx] = Some(value);
    }

    let mut values = Vec::with_capacity(params.len());
    for (param, slot) in params.iter().zip(slots) {
        let value = match (slot, param.default) {
            (Some(lit), _) => lit.as_text().ok_or_else(|| ParseError::ArgumentType {
                operation: operation.clone(),
                name: param.name.to_string(),
                found: lit.type_name(),
            })?,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(ParseError::ArgumentCount {
                    operation,
                    expected: arity_label(params),
                    got: call.args.len() + call.kwargs.len(),
                });
            }
        };
        values.push(value);
    }

    let mut values = values.into_iter();
    let mut next = || values.next().unwrap_or_default();
    let op = match kind {
        OperationKind::CreateFile => Operation::CreateFile {
            path: next(),
            content: next(),
        },
        OperationKind::WriteFile => Operation::WriteFile {
            path: next(),
            content: next(),
        },
        OperationKind::DeletePath => Operation::DeletePath { path: next() },
        OperationKind::RenamePath => Operation::RenamePath {
            old: next(),
            new: next(),
        },
        OperationKind::RunProcess => Operation::RunProcess {
            command_line: next(),
        },
        OperationKind::GenerateImage => Operation::GenerateImage {
            path: next(),
            prompt: next(),
        },
        OperationKind::SetPreference => Operation::SetPreference {
            key: next(),
            value: next(),
        },
        OperationKind::GetPreference => Operation::GetPreference { key: next() },
    };
    Ok(op)
}

fn arity_label(params: &[Param]) -> String {
    let required = params.iter().filter(|p| p.default.is_none()).count();
    if required == params.len() {
        required.to_string()
    } else {
        format!("{required}-{}", params.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command_parse::parse_call;

    #[test]
    fn legacy_names_map_to_registry() {
        assert_eq!(
            OperationKind::from_name("write_to_file"),
            Some(OperationKind::WriteFile)
        );
        assert_eq!(
            OperationKind::from_name("run_command"),
            Some(OperationKind::RunProcess)
        );
        assert!(!OperationKind::is_registered("eval"));
    }

    #[test]
    fn create_file_content_defaults_to_empty() {
        let op = bind(&parse_call("create_file('empty.txt')").expect("parse")).expect("bind");
        assert_eq!(
            op,
            Operation::CreateFile {
                path: "empty.txt".into(),
                content: String::new()
            }
        );
    }

    #[test]
    fn keywords_bind_by_name() {
        let op = bind(&parse_call("rename_path(new='b.txt', old='a.txt')").expect("parse"))
            .expect("bind");
        assert_eq!(
            op,
            Operation::RenamePath {
                old: "a.txt".into(),
                new: "b.txt".into()
            }
        );
    }

    #[test]
    fn arity_and_type_errors_are_reported() {
        let err = bind(&parse_call("delete_path('a', 'b')").expect("parse")).unwrap_err();
        assert!(matches!(err, ParseError::ArgumentCount { got: 2, .. }));

        let err = bind(&parse_call("write_file('a', ['x'])").expect("parse")).unwrap_err();
        assert!(matches!(err, ParseError::ArgumentType { found: "list", .. }));

        let err = bind(&parse_call("get_preference(name='x')").expect("parse")).unwrap_err();
        assert!(matches!(err, ParseError::UnknownKeyword { .. }));
    }

    #[test]
    fn scalar_arguments_are_stringified() {
        let op = bind(&parse_call("set_preference('retries', 3)").expect("parse")).expect("bind");
        assert_eq!(
            op,
            Operation::SetPreference {
                key: "retries".into(),
                value: "3".into()
            }
        );
    }
}
