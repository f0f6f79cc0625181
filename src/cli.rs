pub fn parse_flags<'a>() -> clap::ArgMatches<'a> {
    clap::App::new("mediatree")
        .version(clap::crate_version!())
        .about("Browse, scan and watch a media library")
        .arg(clap::Arg::from_usage("-d --debug 'Enable debug output'").global(true))
        .arg(
            clap::Arg::from_usage("-c, --config [config] 'Path to a library configuration file'")
                .global(true),
        )
        .subcommand(
            clap::SubCommand::with_name("tree")
                .about("Print the media tree")
                .arg(clap::Arg::from_usage("--id [id] 'Node to start from'"))
                .arg(clap::Arg::from_usage("--depth [depth] 'Levels to descend (default 2)'")),
        )
        .subcommand(
            clap::SubCommand::with_name("scan")
                .about("Analyze every file and fill the metadata cache"),
        )
        .subcommand(
            clap::SubCommand::with_name("watch")
                .about("Follow the monitored folders until interrupted"),
        )
        .get_matches()
}
