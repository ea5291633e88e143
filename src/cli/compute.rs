use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use labcore::{
    DraftSession, Gender, LabDirectory, ResultEntry, Scope, Value,
    domain::{FormatPolicy, ParameterKey, TestId},
};
use serde::Serialize;
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Resolve formulas and classify results for the selected tests")]
pub struct Compute {
    /// Test to include (can be specified multiple times)
    #[arg(long = "test", value_name = "ID", required = true)]
    tests: Vec<String>,

    /// Subject gender (male, female, other, unknown)
    #[arg(long, default_value = "unknown")]
    gender: Gender,

    /// Raw value for a parameter (can be specified multiple times)
    #[arg(long = "value", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    values: Vec<(String, String)>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    output: OutputFormat,

    /// Finalize the results and allocate a report identifier
    #[arg(long, requires = "scope")]
    submit: bool,

    /// The lab the report belongs to
    #[arg(long, requires = "submit")]
    scope: Option<Scope>,

    /// Brand the report identifier with this display name
    #[arg(long, value_name = "NAME", requires = "submit")]
    premium: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    session: String,
    entries: &'a [ResultEntry],
    issues: Vec<String>,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{s}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

impl Compute {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let directory = LabDirectory::open(root)?;
        let mut draft = DraftSession::new(self.gender, directory.config().band());

        for id in &self.tests {
            let id = TestId::new(id.as_str());
            let template = directory
                .catalog()
                .get(&id)
                .with_context(|| format!("Test '{id}' is not in the catalog"))?;
            draft.select_test(template.clone())?;
        }

        for (name, value) in &self.values {
            let key = find_parameter(&draft, name)?;
            draft.set_raw(key, value.as_str())?;
        }

        if self.submit {
            let scope = self
                .scope
                .as_ref()
                .context("--submit requires --scope")?;
            let policy = self
                .premium
                .clone()
                .map_or(FormatPolicy::Generic, |display_name| FormatPolicy::Premium {
                    display_name,
                });
            let report = draft.submit(&directory.allocator(), scope, &policy)?;
            match self.output {
                OutputFormat::Table => {
                    print_table(&draft);
                    println!(
                        "\n{}",
                        format!("Report {} finalized", report.report_id).success()
                    );
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            return Ok(());
        }

        match self.output {
            OutputFormat::Table => print_table(&draft),
            OutputFormat::Json => {
                let output = JsonOutput {
                    session: draft.id().to_string(),
                    entries: draft.entries(),
                    issues: draft.issues().iter().map(ToString::to_string).collect(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }
}

fn find_parameter(draft: &DraftSession, name: &str) -> anyhow::Result<ParameterKey> {
    draft
        .entries()
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.key.clone())
        .with_context(|| format!("No selected test has a parameter named '{name}'"))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::Text(s) => s.clone(),
        Value::Unresolved => String::new(),
    }
}

fn print_table(draft: &DraftSession) {
    let width = draft
        .entries()
        .iter()
        .map(|entry| entry.name.len())
        .max()
        .unwrap_or(0);

    for test in draft.tests() {
        println!("{} {}", test.id, test.name.dim());
        for entry in draft.entries().iter().filter(|e| e.key.test == test.id) {
            let level = entry
                .threat_level
                .map_or_else(|| "unclassifiable".critical(), |l| l.to_string().threat(l));
            println!(
                "  {:<width$}  {:>10} {:<8} {level}",
                entry.name,
                display_value(&entry.value),
                entry.unit.dim(),
            );
        }
    }

    let issues = draft.issues();
    if !issues.is_empty() {
        println!();
        for issue in issues {
            println!("{}", format!("⚠️  {issue}").warning());
        }
    }
}

#[cfg(test)]
mod tests {
    use labcore::{BandPolicy, Parameter, TestTemplate};

    use super::*;

    fn draft_with(parameters: Vec<Parameter>) -> DraftSession {
        let mut draft = DraftSession::new(Gender::Female, BandPolicy::CANONICAL);
        draft
            .select_test(TestTemplate {
                id: TestId::new("T"),
                name: String::new(),
                parameters,
            })
            .unwrap();
        draft
    }

    #[test]
    fn parameter_names_are_case_sensitive() {
        let draft = draft_with(vec![
            Parameter::numeric("HDL", "mg/dL"),
            Parameter::numeric("hdl", "mg/dL"),
        ]);

        assert_eq!(find_parameter(&draft, "hdl").unwrap(), ParameterKey::new("T", 1));
        assert_eq!(find_parameter(&draft, "HDL").unwrap(), ParameterKey::new("T", 0));
        assert!(find_parameter(&draft, "Hdl").is_err());
    }

    #[test]
    fn parses_assignment() {
        assert_eq!(
            parse_assignment("Total Cholesterol=200").unwrap(),
            ("Total Cholesterol".to_string(), "200".to_string())
        );
        assert_eq!(
            parse_assignment("Remarks=a=b").unwrap(),
            ("Remarks".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn rejects_malformed_assignment() {
        assert!(parse_assignment("200").is_err());
        assert!(parse_assignment("=200").is_err());
    }

    #[test]
    fn unresolved_values_display_blank() {
        assert_eq!(display_value(&Value::Unresolved), "");
        assert_eq!(display_value(&Value::Number(130.5)), "130.5");
    }
}
