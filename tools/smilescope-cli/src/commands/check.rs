//! Check system capabilities.

use smilescope_platform_linux::permissions;

pub fn run(synthetic: bool, json: bool) -> anyhow::Result<()> {
    if synthetic {
        println!("Synthetic host selected; no system capabilities are required.");
        return Ok(());
    }

    let capabilities = permissions::check_capabilities();
    if json {
        println!("{}", serde_json::to_string_pretty(&capabilities)?);
        return Ok(());
    }

    println!("Smilescope System Check");
    println!("{}", "=".repeat(50));
    permissions::print_capability_report(&capabilities);

    println!();
    if permissions::all_required_available(&capabilities) {
        println!("All required capabilities are available. Smilescope is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
