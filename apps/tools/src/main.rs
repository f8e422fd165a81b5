use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use server_api::{ApiContext, ServiceError};
use shared::{
    domain::{Actor, CourseId},
    error::ApiError,
    protocol::{CreateCourseRequest, CreateStudentRequest, RegisterProfessorRequest},
};
use storage::Storage;

const OPERATOR_IDENTITY: &str = "records-tools";

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/records.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateCourse {
        name: String,
        #[arg(long)]
        logo: Option<String>,
    },
    RegisterProfessor {
        name: String,
        /// Identity provider reference; a random one is generated when omitted.
        #[arg(long)]
        identity: Option<String>,
    },
    CreateStudent {
        name: String,
        /// Birth date as YYYY-MM-DD.
        birth_date: NaiveDate,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        course_id: Option<i64>,
    },
    ListUnits,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = ApiContext {
        storage: Storage::new(&cli.database_url).await?,
    };
    for line in run(&ctx, cli.command).await? {
        println!("{line}");
    }
    Ok(())
}

/// Executes one command as an administrator, going through the same checks
/// as the HTTP API.
async fn run(ctx: &ApiContext, command: Command) -> Result<Vec<String>> {
    let operator = Actor::administrator(OPERATOR_IDENTITY);

    let lines = match command {
        Command::CreateCourse { name, logo } => {
            let course = server_api::create_course(
                ctx,
                &operator,
                CreateCourseRequest {
                    name,
                    logo_reference: logo,
                },
            )
            .await
            .map_err(describe)?;
            vec![format!("created course_id={}", course.id.0)]
        }
        Command::RegisterProfessor { name, identity } => {
            let identity = identity.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let professor_id = server_api::register_professor(
                ctx,
                &operator,
                RegisterProfessorRequest {
                    name,
                    external_identity_ref: identity.clone(),
                },
            )
            .await
            .map_err(describe)?;
            vec![format!(
                "registered professor_id={} identity={identity}",
                professor_id.0
            )]
        }
        Command::CreateStudent {
            name,
            birth_date,
            phone,
            course_id,
        } => {
            let student = server_api::create_student(
                ctx,
                &operator,
                CreateStudentRequest {
                    name,
                    birth_date,
                    phone,
                    course_id: course_id.map(CourseId),
                    external_identity_ref: None,
                },
            )
            .await
            .map_err(describe)?;
            vec![format!("created student_id={}", student.id.0)]
        }
        Command::ListUnits => {
            let mut lines = Vec::new();
            for unit in server_api::list_units(ctx, &operator)
                .await
                .map_err(describe)?
            {
                let professors = ctx.storage.professors_for_unit(unit.id).await?;
                let names: Vec<&str> = professors.iter().map(|p| p.name.as_str()).collect();
                lines.push(format!(
                    "{}\t{}\tyear={} semester={} course={} v{}\t{}",
                    unit.id.0,
                    unit.name,
                    unit.academic_year,
                    unit.semester,
                    unit.course_id.0,
                    unit.version.0,
                    names.join(", ")
                ));
            }
            lines
        }
    };
    Ok(lines)
}

fn describe(err: ServiceError) -> anyhow::Error {
    let body = ApiError::from(err);
    let mut message = body.message;
    for field_error in &body.field_errors {
        message.push_str(&format!("\n  {}: {}", field_error.field, field_error.message));
    }
    anyhow!(message)
}
