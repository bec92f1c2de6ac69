//! Graphviz DOT rendering of an assembled book graph.

use crate::book::Book;
use crate::graph::BookGraph;
use std::collections::HashMap;
use std::fmt::Write;

fn node_id(book: &Book) -> String {
    book.to_string()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Unknown numeric fields carry the -1 sentinel; render placeholders
/// instead of formatting the sentinel as data.
fn format_rating(rating: i32) -> String {
    if rating < 0 {
        return "unrated".to_string();
    }
    format!("{:.1}", rating as f64 / 100.0)
}

fn format_count(value: i32) -> String {
    if value < 0 {
        return "N/A".to_string();
    }
    value.to_string()
}

/// Render the graph as a DOT digraph: one labeled box per vertex, one rank
/// clause per depth level, one labeled edge per recommendation.
pub fn render(graph: &BookGraph) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_graph(graph, &mut out);
    out
}

fn write_graph(graph: &BookGraph, out: &mut String) -> std::fmt::Result {
    let by_url: HashMap<&str, &Book> = graph.all.iter().map(|b| (b.url.as_str(), b)).collect();

    writeln!(out, "digraph G {{")?;

    writeln!(out, "\n// styling")?;
    writeln!(out, "rankdir=LR")?;
    writeln!(out, "splines=ortho")?;
    writeln!(out, "node [shape=box]")?;

    writeln!(out, "\n// node declarations")?;
    for (depth, books) in graph.by_depth.iter().enumerate() {
        for book in books {
            let label = format!(
                "{}\\l{}\\l{} ({} ratings)\\l{} reviews\\ldepth:{}\\l",
                escape(&book.title),
                escape(&book.author),
                format_rating(book.rating),
                format_count(book.ratings_total),
                format_count(book.reviews),
                depth,
            );
            writeln!(
                out,
                "\"{}\" [nojustify=false label=\"{}\" URL=\"{}\"]",
                escape(&node_id(book)),
                label,
                escape(&book.url),
            )?;
        }
    }

    writeln!(out, "\n// rank adjustments")?;
    for (depth, books) in graph.by_depth.iter().enumerate() {
        let rank = if depth == 0 { "source" } else { "same" };
        let nodes: Vec<String> = books
            .iter()
            .map(|book| format!("\"{}\"", escape(&node_id(book))))
            .collect();
        writeln!(out, "{{rank={}; {}}}", rank, nodes.join("; "))?;
    }

    writeln!(out, "\n// edges")?;
    for book in &graph.all {
        for edge in &book.also_read {
            let Some(target) = by_url.get(edge.to.as_str()) else {
                continue;
            };
            writeln!(
                out,
                "\"{}\" -> \"{}\" [label=\"idx:{}\"]",
                escape(&node_id(book)),
                escape(&node_id(target)),
                edge.priority,
            )?;
        }
    }

    writeln!(out, "\n}}")
}
