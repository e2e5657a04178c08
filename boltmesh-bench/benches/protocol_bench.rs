//! Protocol encoding/decoding benchmarks.

use boltmesh_protocol::{
    cmd_code, cmd_type, to_command, to_headers, Command, CommandHeader, Decoder, Encoder,
    HeaderMap, RequestCommand, ResponseCommand, PROTOCOL_CODE_V1,
};
use boltmesh_protocol::serialize::encode_header_map;
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn common(cmd_type: u8, cmd_code: i16, content_size: usize) -> CommandHeader {
    let mut header = HeaderMap::new();
    header.insert("service".into(), "com.example.EchoService:1.0".into());
    header.insert("sofa_head_method_name".into(), "echo".into());
    let header = encode_header_map(&header).unwrap();

    CommandHeader {
        protocol: PROTOCOL_CODE_V1,
        cmd_type,
        cmd_code,
        version: 1,
        request_id: 12345,
        codec: 1,
        class: Bytes::from_static(b"com.alipay.sofa.rpc.core.request.SofaRequest"),
        header,
        content: Bytes::from("x".repeat(content_size)),
    }
}

fn create_test_request(content_size: usize) -> Command {
    Command::Request(RequestCommand {
        common: common(cmd_type::REQUEST, cmd_code::RPC_REQUEST, content_size),
        timeout: 3000,
        arrive_time: None,
    })
}

fn create_test_response(content_size: usize) -> Command {
    Command::Response(ResponseCommand {
        common: common(cmd_type::RESPONSE, cmd_code::RPC_RESPONSE, content_size),
        status: 0,
        response_time: None,
    })
}

fn bench_encode(c: &mut Criterion) {
    for (name, make) in [
        ("request_encode", create_test_request as fn(usize) -> Command),
        ("response_encode", create_test_response),
    ] {
        let mut group = c.benchmark_group(name);
        for size in [100, 1000, 10000] {
            let command = make(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::from_parameter(size), &command, |b, command| {
                b.iter(|| black_box(Encoder::encode_command(command).unwrap()));
            });
        }
        group.finish();
    }
}

fn bench_decode(c: &mut Criterion) {
    for (name, make) in [
        ("request_decode", create_test_request as fn(usize) -> Command),
        ("response_decode", create_test_response),
    ] {
        let mut group = c.benchmark_group(name);
        for size in [100, 1000, 10000] {
            let encoded = Encoder::encode_command(&make(size)).unwrap();
            let decoder = Decoder::new();
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
                b.iter(|| {
                    let mut buf = encoded.clone();
                    black_box(decoder.decode_buf(&mut buf).unwrap())
                });
            });
        }
        group.finish();
    }
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    // many small frames back to back, drained from one buffer
    for count in [10, 100, 1000] {
        let mut stream = BytesMut::new();
        for _ in 0..count {
            stream.extend_from_slice(&Encoder::encode_command(&create_test_request(64)).unwrap());
        }
        let decoder = Decoder::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &stream, |b, stream| {
            b.iter(|| {
                let mut buf = stream.clone();
                let mut n = 0;
                while let Some(cmd) = decoder.decode_buf(&mut buf).unwrap() {
                    black_box(cmd);
                    n += 1;
                }
                n
            });
        });
    }

    group.finish();
}

fn bench_header_mapping(c: &mut Criterion) {
    let command = create_test_request(0);
    let headers = to_headers(&command).unwrap();

    c.bench_function("to_headers", |b| {
        b.iter(|| black_box(to_headers(&command).unwrap()))
    });
    c.bench_function("to_command", |b| {
        b.iter(|| black_box(to_command(&headers).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_decode_stream,
    bench_header_mapping,
);

criterion_main!(benches);
