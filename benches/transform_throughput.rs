//! Compile and transform throughput benchmarks
//!
//! Measures:
//! - Stylesheet compilation
//! - Serialized transformation with varying record counts (1, 10, 100, 1000)
//! - Pull consumption through the record cursor
//!
//! Run benchmarks: `cargo bench --bench transform_throughput`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use trellis::TransformBuilder;

/// A report-style stylesheet exercising sorting, keys, numbering and AVTs.
fn report_stylesheet() -> &'static str {
    r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
        <xsl:output method="xml" indent="yes"/>
        <xsl:strip-space elements="*"/>
        <xsl:key name="byRegion" match="record" use="@region"/>
        <xsl:template match="/">
            <report count="{count(records/record)}">
                <xsl:apply-templates select="records/record">
                    <xsl:sort select="value" data-type="number" order="descending"/>
                </xsl:apply-templates>
            </report>
        </xsl:template>
        <xsl:template match="record">
            <row id="{@id}" peers="{count(key('byRegion', @region))}">
                <xsl:number/>
                <xsl:text>. </xsl:text>
                <xsl:value-of select="name"/>
                <xsl:if test="value &gt; 500"><flag>high</flag></xsl:if>
            </row>
        </xsl:template>
    </xsl:stylesheet>"#
}

/// Generate an input document with `count` records
fn generate_records(count: usize) -> String {
    let mut xml = String::from("<records>");
    for i in 0..count {
        xml.push_str(&format!(
            r#"<record id="r{}" region="{}"><name>Record {}</name><value>{}</value></record>"#,
            i,
            ["north", "south", "east", "west"][i % 4],
            i,
            (i * 37) % 1000
        ));
    }
    xml.push_str("</records>");
    xml
}

fn benchmark_compile(c: &mut Criterion) {
    let stylesheet = report_stylesheet();
    c.bench_function("compile_report_stylesheet", |b| {
        b.iter(|| {
            TransformBuilder::new()
                .with_stylesheet_source(stylesheet, "report.xsl")
                .build()
                .expect("Failed to compile stylesheet")
        });
    });
}

fn benchmark_transform_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_throughput");
    let transformer = TransformBuilder::new()
        .with_stylesheet_source(report_stylesheet(), "report.xsl")
        .build()
        .expect("Failed to compile stylesheet");

    for count in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        let source = generate_records(count);

        group.bench_with_input(BenchmarkId::new("records", count), &source, |b, source| {
            b.iter(|| transformer.transform_str(source).expect("Failed to transform"));
        });
    }

    group.finish();
}

fn benchmark_record_cursor(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_cursor");
    let transformer = TransformBuilder::new()
        .with_stylesheet_source(report_stylesheet(), "report.xsl")
        .build()
        .expect("Failed to compile stylesheet");

    let count = 100;
    let source = generate_records(count);
    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("pull_records", |b| {
        b.iter(|| {
            let document = transformer.parse_document(&source).expect("Failed to parse input");
            transformer
                .records(&document)
                .map(|r| r.expect("Failed to transform"))
                .count()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_compile,
    benchmark_transform_throughput,
    benchmark_record_cursor
);
criterion_main!(benches);
