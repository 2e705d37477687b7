use clap::{App, Arg};

pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

fn is_node_count(value: String) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(n) if n >= 3 => Ok(()),
        Ok(n) => Err(format!("the scenario needs at least 3 nodes, got {n}")),
        Err(e) => Err(format!("invalid node count {value:?}: {e}")),
    }
}

pub fn get_clap_app<'a, 'b>(name: &'a str, about: &'a str, version: &'a str) -> App<'a, 'b> {
    App::new(name)
        .about(about)
        .version(version)
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .takes_value(true)
                .help("Harness configuration (TOML). Unset fields keep their defaults"),
        )
        .arg(
            Arg::with_name("nodes")
                .long("nodes")
                .value_name("N")
                .takes_value(true)
                .validator(is_node_count)
                .help("Cluster size; nodes beyond the third join the builder's partition"),
        )
        .arg(
            Arg::with_name("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .takes_value(true)
                .possible_values(LOG_LEVELS)
                .help("Log filter, overriding RUST_LOG"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .takes_value(false)
                .help("Print the scenario report as JSON"),
        )
}
