use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use hearth_http::codec::{HeaderEncoder, ParseProgress, RequestParser};
use hearth_http::protocol::{Cookie, RequestHeader, ResponseHeader};
use std::hint::black_box;
use tokio_util::codec::Encoder;

const SIMPLE: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

const BROWSER: &[u8] = b"GET /static/app.js?v=42&lang=en HTTP/1.1\r\n\
Host: 127.0.0.1:8080\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br, zstd\r\n\
Connection: keep-alive\r\n\
Cookie: session=3f1c9a0e-7a55-4c1e-9d0a-2b6f4f1d9e11; theme=dark\r\n\
Upgrade-Insecure-Requests: 1\r\n\
Sec-Fetch-Dest: document\r\n\
Sec-Fetch-Mode: navigate\r\n\
\r\n";

fn parse(raw: &[u8]) -> RequestHeader {
    let mut parser = RequestParser::new();
    let progress = parser.feed(raw).unwrap();
    assert_eq!(progress, ParseProgress::Finished);
    let (header, _leftover) = parser.into_parts();
    RequestHeader::from(header)
}

fn bench_request_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parser");

    group.throughput(Throughput::Bytes(SIMPLE.len() as u64));
    group.bench_function("simple", |b| b.iter(|| black_box(parse(black_box(SIMPLE)))));

    group.throughput(Throughput::Bytes(BROWSER.len() as u64));
    group.bench_function("browser", |b| b.iter(|| black_box(parse(black_box(BROWSER)))));

    group.bench_function("browser_byte_by_byte", |b| {
        b.iter(|| {
            let mut parser = RequestParser::new();
            for byte in BROWSER.chunks(1) {
                if parser.feed(black_box(byte)).unwrap() == ParseProgress::Finished {
                    break;
                }
            }
            black_box(parser.is_finished())
        });
    });

    group.finish();
}

fn bench_header_encoder(c: &mut Criterion) {
    let mut header = ResponseHeader::new();
    header.set_code(200);
    header.set_field("Content-Type", "text/html; charset=utf-8");
    header.set_field("Content-Length", "1024");
    header.add_cookie(Cookie::new("session", "3f1c9a0e-7a55-4c1e-9d0a-2b6f4f1d9e11").path("/").http_only(true));

    c.bench_function("encode_response_header", |b| {
        let mut buffer = BytesMut::with_capacity(512);
        b.iter(|| {
            buffer.clear();
            HeaderEncoder.encode(black_box(&header), &mut buffer).unwrap();
            black_box(buffer.len())
        });
    });
}

criterion_group!(benches, bench_request_parser, bench_header_encoder);
criterion_main!(benches);
