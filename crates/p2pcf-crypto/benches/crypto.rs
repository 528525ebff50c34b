use p2pcf_crypto::{decrypt_chunk, encrypt_chunk, generate_file_key, KeyDerivation, MasterSeed};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_chunk(divan::black_box(&file_key), divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_chunk(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let encrypted = encrypt_chunk(&file_key, &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_chunk(divan::black_box(&file_key), divan::black_box(&encrypted)).unwrap());
}

#[divan::bench]
fn bench_derive_ephemeral_keypair(bencher: divan::Bencher) {
    let seed = MasterSeed::from_bytes([0x5Au8; 32]);
    let kd = KeyDerivation::new(&seed);
    let mut index = 0u64;
    bencher.bench_local(|| {
        index += 1;
        kd.ephemeral_keypair(divan::black_box(index)).unwrap()
    });
}

fn main() {
    divan::main();
}
