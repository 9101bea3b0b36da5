use anyhow::{Context, Result, bail};
use engine::{Config, Engine};
use ingest::generate_doc_id;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [path, question] = args.as_slice() else {
        bail!("usage: kgraph <text-file> <question>");
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {path}"))?;

    let engine = Engine::new(Config::default()).await?;

    let doc_id = generate_doc_id(path);
    let report = engine.ingest_document(&doc_id, &text).await?;
    println!(
        "ingested {}: {} chunks ({} failed), {} entities, {} relationships",
        path,
        report.chunks_total,
        report.chunk_failures.len(),
        report.entities_upserted,
        report.relationships_upserted
    );

    let response = engine.query(question).await;
    println!("\nQ: {question}");
    println!("A: {} (confidence {:.2})", response.answer, response.confidence);

    println!("\nevidence:");
    for item in &response.evidence {
        println!(
            "  [{:.2}] ({}) {}",
            item.confidence,
            item.source.label(),
            item.content
        );
    }

    println!("\ntrace:");
    for step in &response.trace {
        println!("  {} ({} ms): {}", step.stage, step.elapsed_ms, step.detail);
    }

    let stats = engine.stats().await?;
    println!(
        "\ngraph: {} entities, {} relationships, {} vectors{}",
        stats.graph.entities,
        stats.graph.relationships,
        stats.vectors,
        if stats.degraded { " (degraded mode)" } else { "" }
    );

    Ok(())
}
