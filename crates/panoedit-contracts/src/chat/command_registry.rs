#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "url",
        action: "open_url",
        arg_key: "url",
    },
    CommandSpec {
        command: "template",
        action: "use_template",
        arg_key: "template",
    },
    CommandSpec {
        command: "view",
        action: "set_view",
        arg_key: "mode",
    },
    CommandSpec {
        command: "edit_model",
        action: "set_edit_model",
        arg_key: "model",
    },
    CommandSpec {
        command: "suggest_model",
        action: "set_suggest_model",
        arg_key: "model",
    },
];

pub(crate) const INDEX_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "select",
        action: "select",
        arg_key: "index",
    },
    CommandSpec {
        command: "try",
        action: "try_suggestion",
        arg_key: "index",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open_file",
        arg_key: "path",
    },
    CommandSpec {
        command: "save",
        action: "save",
        arg_key: "path",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[&str] = &[
    "templates",
    "compare",
    "history",
    "suggestions",
    "dismiss",
    "reset",
    "help",
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/open",
    "/url",
    "/templates",
    "/template",
    "/select",
    "/view",
    "/compare",
    "/history",
    "/suggestions",
    "/try",
    "/save",
    "/dismiss",
    "/reset",
    "/edit_model",
    "/suggest_model",
    "/help",
];
