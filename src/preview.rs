use anyhow::{Context, Result};
use log::info;

use crate::{cli::PreviewArgs, csv_options, data::Frame, printable_delimiter, table};

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let options = csv_options(&args.format)?;
    info!(
        "Previewing '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(options.delimiter_for(&args.input))
    );
    let frame = Frame::read_csv(&args.input, &options)
        .with_context(|| format!("Reading {:?}", args.input))?;
    print!("{}", table::render_frame(&frame, args.rows));
    info!(
        "Displayed {} of {} row(s) from {:?}",
        frame.row_count().min(args.rows),
        frame.row_count(),
        args.input
    );
    Ok(())
}
