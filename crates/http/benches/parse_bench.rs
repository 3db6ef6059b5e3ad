use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tethys_http::{HttpRequest, HttpResponse};

const REQUEST: &[u8] = b"POST /api/v1/items HTTP/1.1\r\n\
    Host: bench.local\r\n\
    User-Agent: bench/1.0\r\n\
    Accept: application/json\r\n\
    Cookie: sid=abc123; theme=dark\r\n\
    Content-Type: application/json\r\n\
    Content-Length: 26\r\n\r\n\
    {\"name\":\"bench\",\"id\":1234}";

fn parse_request(c: &mut Criterion) {
    c.bench_function("parse_request", |b| {
        b.iter(|| {
            let mut request = HttpRequest::new();
            request.receive_header(black_box(REQUEST));
            black_box(request.is_body_complete())
        })
    });
}

fn parse_request_split(c: &mut Criterion) {
    let (head, tail) = REQUEST.split_at(REQUEST.len() / 2);
    c.bench_function("parse_request_split", |b| {
        b.iter(|| {
            let mut request = HttpRequest::new();
            if request.receive_header(black_box(head)) {
                request.receive_body(black_box(tail));
            } else {
                request.receive_header(black_box(tail));
            }
            black_box(request.is_body_complete())
        })
    });
}

fn build_response(c: &mut Criterion) {
    c.bench_function("build_response", |b| {
        b.iter(|| {
            let response =
                HttpResponse::make_get_response(black_box(b"{\"ok\":true}"), "application/json");
            black_box(response.cache().len())
        })
    });
}

criterion_group!(benches, parse_request, parse_request_split, build_response);
criterion_main!(benches);
