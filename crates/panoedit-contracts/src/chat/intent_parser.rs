use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, INDEX_ARG_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_index(&self, key: &str) -> Option<usize> {
        self.command_args
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }
}

fn find_spec<'a>(command: &str, specs: &'a [CommandSpec]) -> Option<&'a CommandSpec> {
    specs.iter().find(|spec| spec.command == command)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_index_arg(arg: &str) -> Value {
    arg.trim()
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or(Value::Null)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(arg.to_string()));
            }

            if let Some(spec) = find_spec(&command, INDEX_ARG_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, parse_index_arg(arg));
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(parse_single_path_arg(arg)));
            }

            if NO_ARG_COMMANDS.iter().any(|value| *value == command) {
                return Intent::new(&command, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
