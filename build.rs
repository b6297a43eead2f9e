use std::env;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=src/templates/");

    // Copy page templates to target/{profile}/templates for runtime access
    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let target_templates_dir = Path::new("target").join(&profile).join("templates");

    if fs::create_dir_all(&target_templates_dir).is_ok() {
        if let Ok(entries) = fs::read_dir("src/templates") {
            for entry in entries.flatten() {
                let path = entry.path();
                if let (true, Some(file_name)) = (path.is_file(), path.file_name()) {
                    let target_path = target_templates_dir.join(file_name);
                    if fs::copy(&path, &target_path).is_ok() {
                        println!("Copied {} to target templates", path.display());
                    }
                }
            }
        }
    }
}
