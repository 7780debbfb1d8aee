use clap::Parser;
use dense_map::DefaultHashBuilder;
use dense_map::DenseMap;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Remove every n-th key after filling, to show compaction
    #[arg(short = 'r', long = "remove_every", default_value_t = 3)]
    remove_every: u64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating DenseMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: DenseMap<u64, u64, DefaultHashBuilder> =
        DenseMap::with_capacity(args.target_capacity);

    println!(
        "Actual capacity: {} ({} buckets)",
        map.capacity(),
        map.bucket_count()
    );
    println!("Filling map with u64 keys...");

    let num_values = map.capacity() as u64;
    for key in 0..num_values {
        if let Err(err) = map.insert(key, key * 2) {
            panic!("inserting {key} failed: {err}");
        }
    }

    println!("Inserted {} entries", map.len());
    map.debug_stats().print();

    if args.remove_every > 0 {
        let mut removed = 0;
        for key in (0..num_values).step_by(args.remove_every as usize) {
            if map.remove(&key).is_some() {
                removed += 1;
            }
        }
        println!("Removed {removed} entries; {} remain densely packed", map.len());

        let histogram = map.chain_histogram();
        println!("Chain length histogram:");
        for (length, buckets) in histogram.iter().enumerate() {
            println!("  {length:>3}: {buckets}");
        }
        map.debug_stats().print();
    }

    let checksum: u64 = map.values().iter().sum();
    println!("Sum of dense values: {checksum}");
}
