//! Shared fixtures for integration tests

#![allow(dead_code)]

use sheetc::{
    Compiler, CompilerConfig, CompilerInput, DslParameter, RawColumn, RawEnumSheet, RawSheet,
    Session, SourceLocation,
};

/// Route pipeline logs through the test harness; `RUST_LOG=sheetc=debug` shows them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn loc(file: &str, sheet: &str) -> SourceLocation {
    SourceLocation::new(file, sheet)
}

pub fn compiler() -> Compiler {
    Compiler::new(CompilerConfig {
        workers: 4,
        ..CompilerConfig::default()
    })
}

/// Resolve and cast without validating
pub fn prepare(input: &CompilerInput) -> Session {
    compiler().prepare(input).expect("input should resolve and cast")
}

/// `Flags = { None: 0, A: 1, B: 2, C: 4 }`
pub fn flags() -> RawEnumSheet {
    RawEnumSheet::new(loc("Enum.xlsx", "Flags"), "Flags")
        .member("None", "0")
        .member("A", "1")
        .member("B", "2")
        .member("C", "4")
}

/// `Lerp(from: float, to: float, t: float = 1.0)`
pub fn lerp() -> (&'static str, Vec<DslParameter>) {
    (
        "Lerp",
        vec![
            DslParameter::new("from", "float"),
            DslParameter::new("to", "float"),
            DslParameter::new("t", "float").with_default("1.0"),
        ],
    )
}

/// Items 1..=3 keyed by `Id`
pub fn items() -> RawSheet {
    RawSheet::new(loc("Item.xlsx", "Items"), "Item")
        .column(
            RawColumn::new("Id", "*int")
                .cell(1, "1")
                .cell(2, "2")
                .cell(3, "3"),
        )
        .column(
            RawColumn::new("Name", "string")
                .cell(1, "Sword")
                .cell(2, "Shield")
                .cell(3, "Potion"),
        )
}

/// A small but complete game data set that compiles cleanly
pub fn game() -> CompilerInput {
    let (name, params) = lerp();
    CompilerInput::new()
        .enum_sheet(flags())
        .dsl(name, params)
        .dsl(
            "Give",
            vec![
                DslParameter::new("item", "$Item"),
                DslParameter::new("count", "int").with_default("1"),
            ],
        )
        .sheet(items())
        .sheet(
            RawSheet::new(loc("Shop.xlsx", "Shops"), "Shop")
                .column(RawColumn::new("Npc", "*int").bold().cell(1, "10").cell(4, "20"))
                .column(RawColumn::new("Slot", "*int").cell(2, "1").cell(3, "2").cell(5, "1"))
                .column(RawColumn::new("Item", "!$Item").cell(2, "1").cell(3, "2").cell(5, "3"))
                .column(RawColumn::new("Tags", "Flags?").cell(2, "A|B"))
                .column(RawColumn::new("Bonus", "dsl?").cell(3, "Give(3, 2)").cell(5, "Lerp(0, 10)")),
        )
}
