//! `scfork-sim`: run the fork-rollback scenario against an in-process
//! simulated cluster and print the report.

mod clap_app;
mod output;

use {
    crate::{clap_app::get_clap_app, output::CliScenarioReport},
    clap::{crate_description, crate_name, crate_version, ArgMatches},
    log::info,
    scfork_harness::{HarnessConfig, NodeId, NodeRegistry, ScenarioConfig, ScenarioDriver},
    scfork_sim_cluster::{SimCluster, SimConfig},
    std::{collections::BTreeSet, error, path::Path, sync::Arc},
};

fn init_logging(level: Option<&str>) {
    let mut builder = match level {
        Some(level) => {
            let mut builder = env_logger::Builder::new();
            builder.parse_filters(level);
            builder
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    let _ = builder.try_init();
}

/// Resize the cluster to `node_count`. Ids past the new size leave their
/// partition group. Nodes are linked in a line, so unassigned nodes join the
/// last group to keep every group connected.
fn resize(scenario: &mut ScenarioConfig, node_count: usize) {
    for group in &mut scenario.partition {
        group.retain(|id| id.0 < node_count);
    }
    let assigned: BTreeSet<NodeId> = scenario.partition.iter().flatten().copied().collect();
    if let Some(last) = scenario.partition.last_mut() {
        last.extend(
            (0..node_count)
                .map(NodeId)
                .filter(|id| !assigned.contains(id)),
        );
    }
    scenario.node_count = node_count;
}

fn build_config(matches: &ArgMatches<'_>) -> Result<HarnessConfig, Box<dyn error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => HarnessConfig::load(Path::new(path))?,
        None => HarnessConfig::default(),
    };
    if let Some(nodes) = matches.value_of("nodes") {
        resize(&mut config.scenario, nodes.parse()?);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn error::Error>> {
    let matches = get_clap_app(crate_name!(), crate_description!(), crate_version!()).get_matches();
    init_logging(matches.value_of("log_level"));

    let config = build_config(&matches)?;
    let cluster = SimCluster::new(SimConfig::with_nodes(config.scenario.node_count))?;
    info!("running fork-rollback scenario on {} node(s)", cluster.len());

    let registry = Arc::new(NodeRegistry::from_handles(cluster.handles())?);
    let mut driver = ScenarioDriver::new(registry, &config)?;
    let report = driver.run()?;

    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", CliScenarioReport(&report));
    }
    Ok(())
}
