pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;

    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }

    Ok(())
}

/// Flattens an error and its sources into a single line, for log fields and
/// per-recipient failure reasons.
pub fn error_chain_line(e: &(dyn std::error::Error + 'static)) -> String {
    let mut line = e.to_string();

    let mut current = e.source();
    while let Some(cause) = current {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        current = cause.source();
    }

    line
}
