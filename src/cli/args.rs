use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "opsdesk",
    version,
    about = "terminal admin console for REST resource collections",
    long_about = "Opsdesk drives create/read/update/delete against the REST collections behind an admin dashboard, from the terminal.\n\nExamples:\n  opsdesk login --user admin01\n  opsdesk list enquiries --search plumber --from-date 2024-01-01\n  opsdesk create gallery -f title=Award2024 -f category=Awards --file image=./award.png\n  opsdesk delete jobs 64f1c0ffee --yes\n\nTip: resources are declared in ~/.opsdesk/config.yml."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase verbosity (-v, -vv)."
    )]
    pub verbose: u8,

    #[arg(
        long = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        long = "json",
        help_heading = "Output",
        help = "Print raw JSON instead of a table."
    )]
    pub json: bool,

    #[arg(
        short = 'C',
        long = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.opsdesk/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'b',
        long = "base-url",
        value_name = "URL",
        help_heading = "Backend",
        help = "Backend base URL (overrides the config file)."
    )]
    pub base_url: Option<String>,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "Backend",
        help = "Client-side request timeout in seconds."
    )]
    pub timeout: Option<usize>,

    #[arg(
        long = "proxy",
        value_name = "URL",
        help_heading = "Backend",
        help = "Route requests through an HTTP proxy."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "page-size",
        value_name = "N",
        help_heading = "Display",
        help = "Records per page for client-side pagination."
    )]
    pub page_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in and persist the session token.
    Login {
        #[arg(short = 'u', long = "user", value_name = "ID")]
        user: String,
    },

    /// Drop the persisted session.
    Logout,

    /// Show the configured resources and their role gates.
    Resources,

    /// Load and display one resource collection.
    List {
        /// Resource name as declared in the config file.
        resource: String,

        #[arg(short = 's', long = "search", value_name = "TEXT")]
        search: Option<String>,

        #[arg(long = "match", value_name = "REGEX", help = "Client-side regex filter.")]
        pattern: Option<String>,

        #[arg(long = "category", value_name = "NAME")]
        category: Option<String>,

        #[arg(long = "from-date", value_name = "YYYY-MM-DD")]
        from_date: Option<String>,

        #[arg(long = "to-date", value_name = "YYYY-MM-DD")]
        to_date: Option<String>,

        #[arg(short = 'p', long = "page", value_name = "N")]
        page: Option<usize>,

        #[arg(long = "limit", value_name = "N")]
        limit: Option<usize>,

        #[arg(
            long = "server",
            help = "Push search/date/pagination to the backend as query parameters."
        )]
        server: bool,
    },

    /// Create one record from field assignments.
    Create {
        resource: String,

        #[arg(
            short = 'f',
            long = "field",
            value_name = "KEY=VALUE",
            action = ArgAction::Append,
            help = "Record field; VALUE is parsed as JSON when possible, else kept as a string."
        )]
        fields: Vec<String>,

        #[arg(
            long = "file",
            value_name = "KEY=PATH",
            action = ArgAction::Append,
            help = "Attach a local file under KEY (uploaded per the resource's strategy)."
        )]
        files: Vec<String>,
    },

    /// Update one record by id.
    Update {
        resource: String,
        id: String,

        #[arg(
            short = 'f',
            long = "field",
            value_name = "KEY=VALUE",
            action = ArgAction::Append
        )]
        fields: Vec<String>,

        #[arg(long = "file", value_name = "KEY=PATH", action = ArgAction::Append)]
        files: Vec<String>,
    },

    /// Delete one record by id (asks for confirmation).
    Delete {
        resource: String,
        id: String,

        #[arg(short = 'y', long = "yes", help = "Skip the confirmation prompt.")]
        yes: bool,
    },
}
