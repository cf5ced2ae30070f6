//! Basic usage example - connect to a calculator server and run a few calls

use mcp_sse_core::{McpClient, McpError, Result};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // Get stream URL from args or use the calculator default
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8000/sse".to_string());

    println!("Connecting to {}", url);
    let client = McpClient::connect(&url).await?;
    client.initialize().await?;

    println!("Tools:");
    for tool in client.list_tools().await? {
        println!("  - {}: {}", tool.name, tool.description);
    }

    let calls = [
        ("add_numbers", json!({"a": 15, "b": 27})),
        ("subtract_numbers", json!({"a": 10, "b": 25})),
        ("multiply_numbers", json!({"a": 6, "b": 7})),
        ("divide_numbers", json!({"a": 100, "b": 4})),
        ("divide_numbers", json!({"a": 1, "b": 0})),
    ];
    for (name, arguments) in calls {
        match client.call_text(name, arguments.clone()).await {
            Ok(text) => println!("{}({}) = {}", name, arguments, text),
            Err(McpError::Tool { message }) => println!("{}({}) failed: {}", name, arguments, message),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
