use crate::cli::{
    Cli, Command, ContactArgs, DbArgs, DismissArgs, DuplicatesArgs, MergeArgs, PlanArgs,
};
use anyhow::{anyhow, bail, Context};
use contactdb_core::{
    core_version, init_logging_from_config, open_db, schema_version, ContactField, CoreConfig,
    DuplicateRepository, FieldKind, FieldResolutions, FieldValue, MergeApi, MergeEngine,
    SqliteDuplicateRepository, SqliteMergeStore, SubmitCandidatesRequest,
    SubmitResolutionRequest,
};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => CoreConfig::default(),
    };
    init_logging_from_config(&config)?;

    match cli.command {
        Command::Info => print_json(&json!({
            "version": core_version(),
            "schema_version": schema_version(),
        })),
        Command::Plan(args) => cmd_plan(&config, args),
        Command::Merge(args) => cmd_merge(&config, args),
        Command::Resolve(args) => cmd_resolve(&config, args),
        Command::References(args) => cmd_references(&config, args),
        Command::Duplicates(args) => cmd_duplicates(&config, args),
        Command::Dismiss(args) => cmd_dismiss(&config, args),
    }
}

fn cmd_plan(config: &CoreConfig, args: PlanArgs) -> anyhow::Result<()> {
    let conn = open(config, &args.db)?;
    let api = merge_api(config, &conn);

    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: None,
            candidate_ids: args.ids,
            primary_id: args.primary,
        })
        .map_err(|failure| anyhow!("{} ({})", failure.message, failure.code))?;
    print_json(&response)
}

fn cmd_merge(config: &CoreConfig, args: MergeArgs) -> anyhow::Result<()> {
    let resolutions = parse_resolutions(&args.resolutions)?;
    let conn = open(config, &args.db)?;
    let api = merge_api(config, &conn);

    let response = api
        .submit_candidates(SubmitCandidatesRequest {
            session_token: None,
            candidate_ids: args.ids,
            primary_id: Some(args.primary),
        })
        .map_err(|failure| anyhow!("{} ({})", failure.message, failure.code))?;
    let outcome = api.submit_resolution(SubmitResolutionRequest {
        session_token: response.session_token,
        primary_id: args.primary,
        resolutions,
    });

    print_json(&outcome)?;
    match &outcome.error {
        Some(failure) => bail!("merge failed: {}", failure.code),
        None => {
            info!("event=cli_merge module=cli status=ok primary={}", args.primary);
            Ok(())
        }
    }
}

fn cmd_resolve(config: &CoreConfig, args: ContactArgs) -> anyhow::Result<()> {
    let conn = open(config, &args.db)?;
    let engine = merge_engine(config, &conn);
    let primary_id = engine.resolve_primary(args.id)?;
    print_json(&json!({ "id": args.id, "primary_id": primary_id }))
}

fn cmd_references(config: &CoreConfig, args: ContactArgs) -> anyhow::Result<()> {
    let conn = open(config, &args.db)?;
    let engine = merge_engine(config, &conn);
    print_json(&engine.list_references_to(args.id)?)
}

fn cmd_duplicates(config: &CoreConfig, args: DuplicatesArgs) -> anyhow::Result<()> {
    let conn = open(config, &args.db)?;
    let mut groups = SqliteDuplicateRepository::new(&conn).find_possible_duplicates()?;
    if !args.all {
        groups.retain(|group| !group.is_dismissed);
    }
    print_json(&groups)
}

fn cmd_dismiss(config: &CoreConfig, args: DismissArgs) -> anyhow::Result<()> {
    let conn = open(config, &args.db)?;
    let dismissed = SqliteDuplicateRepository::new(&conn).dismiss_duplicate(&args.ids)?;
    info!(
        "event=cli_dismiss module=cli status=ok contacts={} new={}",
        args.ids.len(),
        dismissed
    );
    print_json(&json!({ "contact_ids": args.ids, "dismissed": dismissed }))
}

fn open(config: &CoreConfig, args: &DbArgs) -> anyhow::Result<Connection> {
    let path = args
        .db
        .as_ref()
        .or(config.database_path.as_ref())
        .context("no database given; pass --db or set database_path in the config")?;
    open_db(path).with_context(|| format!("failed to open database `{}`", path.display()))
}

fn merge_engine<'conn>(
    config: &CoreConfig,
    conn: &'conn Connection,
) -> MergeEngine<SqliteMergeStore<'conn>> {
    let store = SqliteMergeStore::new(conn, config.merge.lock_ttl());
    MergeEngine::with_settings(store, config.merge.session_ttl(), config.merge.policy())
}

fn merge_api<'conn>(config: &CoreConfig, conn: &'conn Connection) -> MergeApi<SqliteMergeStore<'conn>> {
    MergeApi::new(merge_engine(config, conn))
}

fn parse_resolutions(raw: &[String]) -> anyhow::Result<FieldResolutions> {
    let mut resolutions = FieldResolutions::new();
    for entry in raw {
        let (field, value) = parse_resolution(entry)?;
        if resolutions.insert(field, value).is_some() {
            bail!("field `{field}` resolved more than once");
        }
    }
    Ok(resolutions)
}

// `field=<json>`; the JSON shape follows the field kind.
fn parse_resolution(entry: &str) -> anyhow::Result<(ContactField, FieldValue)> {
    let (name, raw_value) = entry
        .split_once('=')
        .with_context(|| format!("expected FIELD=JSON, got `{entry}`"))?;
    let field =
        ContactField::from_name(name).with_context(|| format!("unknown contact field `{name}`"))?;
    let json: Value = serde_json::from_str(raw_value)
        .with_context(|| format!("invalid JSON value for `{field}`"))?;

    let value = match (field.kind(), json) {
        (FieldKind::Text, Value::String(text)) => FieldValue::Text(text),
        (FieldKind::Flag, Value::Bool(flag)) => FieldValue::Flag(flag),
        (FieldKind::Organization, Value::Null) => FieldValue::Organization(None),
        (FieldKind::Organization, Value::String(id)) => FieldValue::Organization(Some(
            Uuid::parse_str(&id).with_context(|| format!("invalid organization id `{id}`"))?,
        )),
        (FieldKind::List, Value::Array(items)) => FieldValue::List(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text),
                    other => Err(anyhow!("list items must be strings, got {other}")),
                })
                .collect::<anyhow::Result<_>>()?,
        ),
        (kind, other) => bail!("field `{field}` expects a {kind:?} value, got {other}"),
    };
    Ok((field, value))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_resolution, parse_resolutions};
    use contactdb_core::{ContactField, FieldValue};

    #[test]
    fn parses_typed_resolutions() {
        assert_eq!(
            parse_resolution(r#"first_name="John""#).unwrap(),
            (ContactField::FirstName, FieldValue::Text("John".to_string()))
        );
        assert_eq!(
            parse_resolution("org_head=true").unwrap(),
            (ContactField::OrgHead, FieldValue::Flag(true))
        );
        assert_eq!(
            parse_resolution("organization=null").unwrap(),
            (ContactField::Organization, FieldValue::Organization(None))
        );
    }

    #[test]
    fn rejects_bad_resolutions() {
        assert!(parse_resolution("first_name").is_err());
        assert!(parse_resolution("nickname=\"J\"").is_err());
        assert!(parse_resolution("org_head=\"yes\"").is_err());
        assert!(parse_resolutions(&[
            r#"city="Geneva""#.to_string(),
            r#"city="Paris""#.to_string(),
        ])
        .is_err());
    }
}
