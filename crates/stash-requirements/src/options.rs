use tracing::info;

use crate::Error;

/// Does the option take a value? `None` for unrecognized options.
///
/// `-e`/`--editable` take no value here: the "value" is the requirement
/// itself. Everything else follows the pip requirements file format.
fn option_takes_value(option: &str) -> Option<bool> {
    Some(match option {
        "-c" | "--constraint" | "-i" | "--index-url" | "--extra-index-url" | "-f"
        | "--find-links" | "--no-binary" | "--only-binary" | "-r" | "--requirement"
        | "--trusted-host" | "--use-feature" | "--hash" => true,
        "-e" | "--editable" | "--no-index" | "--pre" | "--prefer-binary" | "--require-hashes" => {
            false
        }
        _ => return None,
    })
}

/// Options that attach to a single requirement; all others are global.
fn is_requirement_option(option: &str) -> bool {
    matches!(option, "-e" | "--editable" | "--hash")
}

/// Split one logical manifest line into global options, per-requirement
/// options, and the requirement text.
pub(crate) fn split_options_and_requirement(
    line: &str,
) -> Result<(Vec<String>, Vec<String>, String), Error> {
    let mut global_options: Vec<String> = Vec::new();
    let mut requirement_options: Vec<String> = Vec::new();
    let mut requirement: Vec<&str> = Vec::new();

    // Set when the previous option still needs a value from the next token.
    let mut require_value = false;
    // Which bucket the pending value (and the last option) went to.
    let mut requirement_context = false;

    for part in line.split_whitespace() {
        if require_value {
            let bucket = if requirement_context {
                &mut requirement_options
            } else {
                &mut global_options
            };
            bucket.push(part.to_string());
            require_value = false;
        } else if part.starts_with('-') {
            let (option, value) = match part.split_once('=') {
                Some((option, value)) => (option, Some(value)),
                None => (part, None),
            };

            let Some(takes_value) = option_takes_value(option) else {
                return Err(Error::UnknownOption(part.to_string()));
            };
            if value.is_some() && !takes_value {
                return Err(Error::UnexpectedOptionValue(part.to_string()));
            }

            require_value = takes_value;
            requirement_context = is_requirement_option(option);
            let bucket = if requirement_context {
                &mut requirement_options
            } else {
                &mut global_options
            };
            bucket.push(option.to_string());
            if let Some(value) = value {
                bucket.push(value.to_string());
                require_value = false;
            }
        } else {
            requirement.push(part);
        }
    }

    if require_value {
        let bucket = if requirement_context {
            &requirement_options
        } else {
            &global_options
        };
        return Err(Error::OptionMissingValue(
            bucket.last().cloned().unwrap_or_default(),
        ));
    }

    if !requirement_options.is_empty() && requirement.is_empty() {
        return Err(Error::OptionsWithoutRequirement(requirement_options));
    }

    Ok((global_options, requirement_options, requirement.join(" ")))
}

/// The global options the fetch pipeline honors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    /// `--require-hashes`: every requirement must carry a hash.
    pub require_hashes: bool,
    /// `--trusted-host`: hosts (or `host:port`) to skip TLS verification for.
    pub trusted_hosts: Vec<String>,
}

/// Process the global options of a manifest.
///
/// Options that would change which artifacts get fetched (alternate indexes,
/// find-links, binary selection) are rejected; options that only matter at
/// install time are ignored with a log message.
pub fn process_options(options: &[String]) -> Result<GlobalOptions, Error> {
    const REJECTED: [&str; 7] = [
        "-i",
        "--index-url",
        "--extra-index-url",
        "--no-index",
        "-f",
        "--find-links",
        "--only-binary",
    ];

    let mut global = GlobalOptions::default();
    let mut ignored: Vec<&str> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();

    let mut i = 0;
    while i < options.len() {
        let option = options[i].as_str();
        if option == "--require-hashes" {
            global.require_hashes = true;
        } else if option == "--trusted-host" {
            if let Some(host) = options.get(i + 1) {
                global.trusted_hosts.push(host.clone());
                i += 1;
            }
        } else if REJECTED.contains(&option) {
            rejected.push(option.to_string());
        } else if option.starts_with('-') {
            ignored.push(option);
        }
        i += 1;
    }

    if !ignored.is_empty() {
        info!("Ignoring the following requirements file options: {}", ignored.join(", "));
    }
    if !rejected.is_empty() {
        return Err(Error::RejectedOptions(rejected));
    }

    Ok(global)
}
