#![deny(warnings)]

//! Headless runner: loads a YAML scenario, wires the simulation, runs it,
//! and reports what was recorded.

use std::collections::BTreeMap;

use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use persistence::{EventLog, MemBackend, MemHandle, SqliteBackend};
use sim_core::{CompVec, Composition, NucId, SimpleDecay};
use sim_runtime::models::construct;
use sim_runtime::{
    AgentKind, AgentMeta, Context, InstModel, MarketModel, MatchPolicy, RegionModel,
};

/// A minimal one-source, one-sink fuel chain used when no scenario file is
/// given.
const DEFAULT_SCENARIO: &str = r#"
simulation:
  duration: 12
  start_month: 1
  start_year: 2005
  decay: -1
  handle: default
recipes:
  - name: natural_uranium
    basis: mass
    nuclides:
      922350000: 0.0072
      922380000: 0.9928
markets:
  - name: fuel_market
    commodity: fuel
facilities:
  - name: mine
    kind: Source
    params:
      commodity: fuel
      recipe: natural_uranium
      capacity: 100.0
  - name: repository
    kind: Sink
    params:
      commodity: fuel
      capacity: 30.0
regions:
  - name: region_one
    allowed_facilities: [mine, repository]
    institutions:
      - name: operator
        initial_build:
          - { prototype: mine, number: 1 }
          - { prototype: repository, number: 1 }
"#;

#[derive(Debug, Deserialize)]
struct Scenario {
    simulation: SimulationCfg,
    #[serde(default)]
    recipes: Vec<RecipeCfg>,
    #[serde(default)]
    markets: Vec<MarketCfg>,
    #[serde(default)]
    facilities: Vec<FacilityCfg>,
    #[serde(default)]
    regions: Vec<RegionCfg>,
}

fn default_decay() -> i32 {
    -1
}

#[derive(Debug, Deserialize)]
struct SimulationCfg {
    duration: i32,
    start_month: u32,
    start_year: i32,
    #[serde(default)]
    sim_start: i32,
    #[serde(default = "default_decay")]
    decay: i32,
    #[serde(default)]
    handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Basis {
    Atom,
    Mass,
}

#[derive(Debug, Deserialize)]
struct RecipeCfg {
    name: String,
    basis: Basis,
    nuclides: BTreeMap<u32, f64>,
}

#[derive(Debug, Deserialize)]
struct MarketCfg {
    name: String,
    commodity: String,
    #[serde(default)]
    policy: MatchPolicy,
}

#[derive(Debug, Deserialize)]
struct FacilityCfg {
    name: String,
    kind: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RegionCfg {
    name: String,
    #[serde(default)]
    allowed_facilities: Vec<String>,
    #[serde(default)]
    institutions: Vec<InstCfg>,
}

#[derive(Debug, Deserialize)]
struct InstCfg {
    name: String,
    #[serde(default)]
    initial_build: Vec<BuildCfg>,
}

#[derive(Debug, Deserialize)]
struct BuildCfg {
    prototype: String,
    number: u32,
}

struct Args {
    scenario: Option<String>,
    sqlite: Option<String>,
    activity: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        scenario: None,
        sqlite: None,
        activity: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next(),
            "--sqlite" => args.sqlite = it.next(),
            "--activity" => args.activity = it.next(),
            _ => {}
        }
    }
    args
}

fn wire(ctx: &mut Context, scenario: &Scenario) -> Result<()> {
    let sim = &scenario.simulation;
    ctx.init_time(
        sim.duration,
        sim.start_month,
        sim.start_year,
        sim.sim_start,
        sim.decay,
        &sim.handle,
    )?;

    for recipe in &scenario.recipes {
        let vect: CompVec = recipe
            .nuclides
            .iter()
            .map(|(id, qty)| (NucId(*id), *qty))
            .collect();
        let comp = match recipe.basis {
            Basis::Atom => Composition::from_atom(vect)?,
            Basis::Mass => Composition::from_mass(vect)?,
        };
        ctx.register_recipe(&recipe.name, comp)?;
        info!(recipe = %recipe.name, "recipe registered");
    }

    for facility in &scenario.facilities {
        let proto = construct(&facility.kind, &facility.params)
            .with_context(|| format!("constructing prototype '{}'", facility.name))?;
        ctx.register_prototype(&facility.name, proto)?;
        info!(prototype = %facility.name, kind = %facility.kind, "prototype registered");
    }

    for market in &scenario.markets {
        let id = ctx.add_agent(
            AgentMeta::new(market.name.clone(), AgentKind::Market, "CommodityMarket"),
            Box::new(MarketModel::new(market.commodity.clone(), market.policy)),
        )?;
        ctx.deploy(id, None)?;
    }

    for region in &scenario.regions {
        let region_id = ctx.add_agent(
            AgentMeta::new(region.name.clone(), AgentKind::Region, "Region"),
            Box::new(RegionModel::new(region.allowed_facilities.iter().cloned())),
        )?;
        ctx.deploy(region_id, None)?;
        for inst in &region.institutions {
            let build_order: Vec<(String, u32)> = inst
                .initial_build
                .iter()
                .map(|b| (b.prototype.clone(), b.number))
                .collect();
            let inst_id = ctx.add_agent(
                AgentMeta::new(inst.name.clone(), AgentKind::Inst, "Inst"),
                Box::new(InstModel::new(build_order)),
            )?;
            ctx.deploy(inst_id, Some(region_id))?;
        }
    }
    Ok(())
}

fn summarize(handle: &MemHandle) {
    println!(
        "Run complete | agents: {} | deaths: {} | transactions: {} | resources moved: {} | compositions: {}",
        handle.count("Agents"),
        handle.count("AgentDeaths"),
        handle.count("Transactions"),
        handle.count("Resources"),
        handle.count("Compositions"),
    );
}

fn run() -> Result<()> {
    let args = parse_args();

    let text = match &args.scenario {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario file '{path}'"))?,
        None => DEFAULT_SCENARIO.to_string(),
    };
    let scenario: Scenario = serde_yaml::from_str(&text).context("parsing scenario")?;

    let mut log = EventLog::new();
    let mem_handle = match &args.sqlite {
        Some(path) => {
            log.register_backend(Box::new(SqliteBackend::open(path)?));
            None
        }
        None => {
            let (backend, handle) = MemBackend::new();
            log.register_backend(Box::new(backend));
            Some(handle)
        }
    };

    let mut ctx = Context::with_decay_engine(log, Box::new(SimpleDecay::new()));
    wire(&mut ctx, &scenario)?;

    let outcome = ctx.run_sim();
    // Persist whatever was recorded, even on a failed run.
    ctx.close_log()?;
    if let Err(err) = outcome {
        bail!("simulation failed: {err}");
    }

    if let Some(path) = &args.activity {
        let rows = ctx.timer().market_activity();
        persistence::write_market_activity_parquet(path, &rows)?;
        println!("Market activity written: {path}");
    }

    match (&mem_handle, &args.sqlite) {
        (Some(handle), _) => summarize(handle),
        (None, Some(path)) => println!("Run complete | events persisted to {path}"),
        (None, None) => {}
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_parses_and_runs() {
        let scenario: Scenario = serde_yaml::from_str(DEFAULT_SCENARIO).unwrap();
        assert_eq!(scenario.simulation.duration, 12);

        let (backend, handle) = MemBackend::new();
        let mut log = EventLog::with_dump_count(0);
        log.register_backend(Box::new(backend));
        let mut ctx = Context::with_decay_engine(log, Box::new(SimpleDecay::new()));
        wire(&mut ctx, &scenario).unwrap();
        ctx.run_sim().unwrap();

        // One market, one region, one institution, two facilities.
        assert_eq!(handle.count("Agents"), 5);
        // Twelve months of 30 kg deliveries.
        assert_eq!(handle.count("Transactions"), 12);
    }

    #[test]
    fn unknown_kind_fails_wiring() {
        let text = r#"
simulation: { duration: 1, start_month: 1, start_year: 2005 }
facilities:
  - name: x
    kind: Reactor
"#;
        let scenario: Scenario = serde_yaml::from_str(text).unwrap();
        let mut ctx = Context::new(EventLog::new());
        assert!(wire(&mut ctx, &scenario).is_err());
    }
}
