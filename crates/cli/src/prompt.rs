use std::io::{self, BufRead, Write};

use crossterm::style::Stylize;
use fieldcam_core::drive::MountPoint;

/// Lists the candidates, reads a 1-based choice and a yes/no confirmation.
/// Anything other than a valid, confirmed choice yields `None`.
pub fn choose_device<R, W>(
    candidates: &[MountPoint],
    input: &mut R,
    out: &mut W,
) -> io::Result<Option<MountPoint>>
where
    R: BufRead,
    W: Write,
{
    if candidates.is_empty() {
        writeln!(out, "{}", "No USB storage devices found.".red())?;
        return Ok(None);
    }

    writeln!(
        out,
        "{}",
        "Please choose a USB storage device for data transfer:".cyan()
    )?;
    for (idx, mount) in candidates.iter().enumerate() {
        writeln!(
            out,
            "{} {}",
            format!("{}.", idx + 1).yellow(),
            describe(mount)
        )?;
    }

    write!(
        out,
        "Enter the number of the device you want to use (1-{}): ",
        candidates.len()
    )?;
    out.flush()?;
    let Some(answer) = read_answer(input)? else {
        writeln!(out)?;
        return Ok(None);
    };

    let choice: usize = match answer.parse() {
        Ok(v) => v,
        Err(_) => {
            writeln!(out, "{}", "Invalid input, please enter a number.".red())?;
            return Ok(None);
        }
    };
    let Some(selected) = choice.checked_sub(1).and_then(|i| candidates.get(i)) else {
        writeln!(
            out,
            "{}",
            "Invalid choice, please select a valid device number.".red()
        )?;
        return Ok(None);
    };

    let shown = selected.mount_path.display().to_string();
    writeln!(out, "{} {}", "You selected:".cyan(), shown)?;
    write!(
        out,
        "{} Is this correct? (Y/YES/y/yes): ",
        format!("You chose {shown}.").yellow()
    )?;
    out.flush()?;

    let confirmed = read_answer(input)?
        .map(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes"))
        .unwrap_or(false);
    if !confirmed {
        writeln!(out, "{}", "You did not confirm the device.".red())?;
        return Ok(None);
    }

    writeln!(
        out,
        "{} You will be using {shown} for data transfer.",
        "Confirmed.".green()
    )?;
    Ok(Some(selected.clone()))
}

pub fn describe(mount: &MountPoint) -> String {
    match &mount.label {
        Some(label) => format!(
            "Device: {} ({label}), Mount Point: {}",
            mount.device,
            mount.mount_path.display()
        ),
        None => format!(
            "Device: {}, Mount Point: {}",
            mount.device,
            mount.mount_path.display()
        ),
    }
}

fn read_answer<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
