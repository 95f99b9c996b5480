use std::fs;

/// Write the OpenAPI document to the path given as the first argument, or stdout.
fn main() -> anyhow::Result<()> {
    let doc = ops_desk::docs::build_openapi(8000)?;
    let rendered = serde_json::to_string_pretty(&doc)?;

    match std::env::args().nth(1) {
        Some(path) => {
            fs::write(&path, rendered)?;
            println!("wrote {}", path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
