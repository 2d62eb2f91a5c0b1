use chrono::{TimeZone, Utc};
use cuneiform::{parse_schema_str, Result, Session};

const SCHEMA: &str = include_str!("../schema.yaml");

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let path = std::env::var("CUNEIFORM_DB").unwrap_or_else(|_| "companies.db".to_string());
    log::info!("Using database at: {path}");

    let mut session = Session::open(&path)?;
    session.register_schema(&parse_schema_str(SCHEMA)?)?;
    for report in session.sync_reports() {
        for change in &report.changes {
            log::info!("{}: {}", report.table, change.describe());
        }
    }

    // Start from empty tables so the walkthrough can be rerun
    for model in ["Company", "Address", "Town"] {
        session.select(model)?.delete()?;
    }

    let karlsruhe = session
        .new_record("Town")?
        .set("name", "Karlsruhe")
        .build()?;
    let addr = session
        .new_record("Address")?
        .set("street", "Zeppelinstr")
        .set("house", 2)
        .set("post_code", "76185")
        .link("town", &karlsruhe)
        .build()?;

    let solute = session
        .new_record("Company")?
        .set("name", "solute")
        .set("type", session.enum_value("CompanyType", "GmbH")?)
        .set("founded", Utc.with_ymd_and_hms(2002, 1, 1, 0, 0, 0).single())
        .link("addr", &addr)
        .build()?;
    println!("before save: {solute}");

    // Saves the town and the address first
    solute.save()?;
    println!("after save:  {solute}");
    println!("address:     {addr}");

    let name = session.field("Company", "name")?;
    let found = session
        .select("Company")?
        .filter(name.eq("solute")?)?
        .get()?;
    println!("found:       {}", serde_json::to_string(&found.to_json()?)?);

    let acme = session
        .new_record("Company")?
        .set("name", "acme")
        .set("type", session.enum_value("CompanyType", "Inc")?)
        .build()?;
    acme.save()?;

    println!("companies at {addr}:");
    for company in addr.related("companies")?.all()? {
        println!("  {company}");
    }

    let in_karlsruhe = session
        .select("Company")?
        .filter(session.follow("Company", "addr", "town")?.eq(karlsruhe.reference()?)?)?
        .order_by(name.asc())?;
    println!("{in_karlsruhe}: {} row(s)", in_karlsruhe.len()?);

    let homeless = session
        .select("Company")?
        .filter(session.field("Company", "addr")?.is_null())?;
    homeless.update(&[("listed", true.into())])?;
    for company in homeless.all()? {
        println!("without address: {company}");
    }

    acme.set("name", "ACME")?;
    println!("renamed:     {acme}");
    acme.save()?;

    let count = session.select("Company")?.len()?;
    println!("{count} companies stored");
    Ok(())
}
