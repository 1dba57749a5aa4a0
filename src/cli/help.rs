use std::fmt::Write;

#[derive(Debug, Clone)]
struct OptionGuide {
    flag: &'static str,
    description: &'static str,
}

#[derive(Debug, Clone)]
struct CommandGuide {
    name: &'static str,
    summary: &'static str,
    usage: &'static [&'static str],
    options: &'static [OptionGuide],
    examples: &'static [&'static str],
}

const GLOBAL_OPTIONS: &[OptionGuide] = &[
    OptionGuide {
        flag: "-h, --help",
        description: "Show contextual help information.",
    },
    OptionGuide {
        flag: "-V, --version",
        description: "Print the weaver version.",
    },
    OptionGuide {
        flag: "--log-format <auto|text|json>",
        description: "Log event format on stderr (overrides WEAVER_LOG_FORMAT).",
    },
    OptionGuide {
        flag: "--log-level <level>",
        description: "Log verbosity: error, warn, info, debug or trace (overrides WEAVER_LOG_LEVEL).",
    },
];

const WEAVE_OPTIONS: &[OptionGuide] = &[
    OptionGuide {
        flag: "-c, --config <path>",
        description: "Configuration file applied after discovered weaver.yaml files.",
    },
    OptionGuide {
        flag: "-m, --mode <parallel|sequential|randomized>",
        description: "Execution mode for aspect instances.",
    },
    OptionGuide {
        flag: "--seed <n>",
        description: "Seed for randomized execution order.",
    },
    OptionGuide {
        flag: "-j, --max-workers <n>",
        description: "Worker threads for parallel execution.",
    },
    OptionGuide {
        flag: "--format <text|json>",
        description: "Output format on stdout.",
    },
];

const COMMAND_GUIDES: &[CommandGuide] = &[
    CommandGuide {
        name: "run",
        summary: "Weave a fixture and print the transformations per target.",
        usage: &["weaver run <fixture.yaml> [options] [--commit]"],
        options: &[OptionGuide {
            flag: "--commit",
            description: "Also commit introductions into a successor snapshot and report it.",
        }],
        examples: &[
            "weaver run aspects.yaml",
            "weaver run aspects.yaml --mode randomized --seed 7 --format json",
        ],
    },
    CommandGuide {
        name: "check",
        summary: "Weave a fixture and report diagnostics without printing transformations.",
        usage: &["weaver check <fixture.yaml> [options]"],
        options: &[],
        examples: &["weaver check aspects.yaml --mode sequential"],
    },
];

/// Usage text for `topic`, or the overview when `topic` is `None` or unknown.
#[must_use]
pub fn usage(topic: Option<&str>) -> String {
    let guide = topic.and_then(|topic| COMMAND_GUIDES.iter().find(|guide| guide.name == topic));
    match guide {
        Some(guide) => command_usage(guide),
        None => overview(),
    }
}

fn overview() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "weaver: resolve aspect advice and weave it into a declaration model");
    let _ = writeln!(out);
    let _ = writeln!(out, "Usage: weaver [global options] <command> [args]");
    let _ = writeln!(out);
    let _ = writeln!(out, "Commands:");
    for guide in COMMAND_GUIDES {
        let _ = writeln!(out, "  {:<8} {}", guide.name, guide.summary);
    }
    let _ = writeln!(out, "  {:<8} {}", "help", "Show help for a command.");
    let _ = writeln!(out, "  {:<8} {}", "version", "Print the weaver version.");
    let _ = writeln!(out);
    write_options(&mut out, "Global options:", GLOBAL_OPTIONS);
    out.trim_end().to_string()
}

fn command_usage(guide: &CommandGuide) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", guide.summary);
    let _ = writeln!(out);
    let _ = writeln!(out, "Usage:");
    for line in guide.usage {
        let _ = writeln!(out, "  {line}");
    }
    let _ = writeln!(out);
    write_options(&mut out, "Options:", WEAVE_OPTIONS);
    if !guide.options.is_empty() {
        write_options(&mut out, &format!("{} options:", guide.name), guide.options);
    }
    write_options(&mut out, "Global options:", GLOBAL_OPTIONS);
    let _ = writeln!(out, "Examples:");
    for example in guide.examples {
        let _ = writeln!(out, "  {example}");
    }
    out.trim_end().to_string()
}

fn write_options(out: &mut String, heading: &str, options: &[OptionGuide]) {
    let _ = writeln!(out, "{heading}");
    let width = options.iter().map(|option| option.flag.len()).max().unwrap_or(0);
    for option in options {
        let _ = writeln!(out, "  {:<width$}  {}", option.flag, option.description);
    }
    let _ = writeln!(out);
}
