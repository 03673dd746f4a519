use crate::commands::{filter, schema, stats, value};

#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExample] {
    &[
        CommandExample {
            name: "schema",
            groups: schema::EXAMPLES,
        },
        CommandExample {
            name: "value",
            groups: value::EXAMPLES,
        },
        CommandExample {
            name: "filter",
            groups: filter::EXAMPLES,
        },
        CommandExample {
            name: "stats",
            groups: stats::EXAMPLES,
        },
    ]
}
