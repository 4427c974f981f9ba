//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use lmsdash_core::api::resources::{Filter, Id, Resource};
use lmsdash_core::models::NotificationId;

/// lmsdash - command-line client for the learning-management dashboard.
#[derive(Parser, Debug)]
#[command(name = "lmsdash")]
#[command(about = "Log in, browse courses and follow notifications from the terminal")]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// API base URL (overrides the config file and LMSDASH_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Log in (prompts for the password)
    Login {
        /// Defaults to the last user who logged in
        username: Option<String>,
    },

    /// Forget the saved session
    Logout,

    /// Show session state
    Status,

    /// Fetch and show your profile
    Whoami,

    /// Authenticated GET of any API path
    Get {
        /// Path relative to the API base, e.g. courses/3/
        path: String,
    },

    /// List a collection (courses, lessons, materials, assignments,
    /// submissions, tests, questions, answers, test-results, attendance)
    List {
        #[arg(value_parser = parse_resource)]
        resource: Resource,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show unread notifications
    Notifications {
        /// Keep polling until Ctrl-C or the session ends
        #[arg(short, long)]
        watch: bool,
    },

    /// Mark notifications as read
    Read(ReadArgs),
}

#[derive(Args, Debug, Default, PartialEq)]
pub struct FilterArgs {
    #[arg(long)]
    pub course: Option<Id>,
    #[arg(long)]
    pub lesson: Option<Id>,
    #[arg(long)]
    pub assignment: Option<Id>,
    #[arg(long)]
    pub test: Option<Id>,
    #[arg(long)]
    pub question: Option<Id>,
    #[arg(long)]
    pub student: Option<Id>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub date: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            course_id: args.course,
            lesson_id: args.lesson,
            assignment_id: args.assignment,
            test_id: args.test,
            question_id: args.question,
            student_id: args.student,
            date: args.date,
        }
    }
}

#[derive(Args, Debug, PartialEq)]
#[group(required = true, multiple = false)]
pub struct ReadArgs {
    /// Notification id
    pub id: Option<NotificationId>,

    /// Mark every notification as read
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadTarget {
    One(NotificationId),
    All,
}

impl ReadArgs {
    pub fn target(&self) -> ReadTarget {
        match self.id {
            Some(id) if !self.all => ReadTarget::One(id),
            _ => ReadTarget::All,
        }
    }
}

fn parse_resource(name: &str) -> Result<Resource, String> {
    Resource::from_name(name).ok_or_else(|| format!("unknown resource '{}'", name))
}
