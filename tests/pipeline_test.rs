// Integration tests for the full import -> aggregate -> archive -> query
// pipeline. These verify end-to-end totals across both storage tiers.

#[cfg(test)]
mod pipeline_tests {
    // Note: These are placeholder tests. Full integration testing requires:
    // 1. A Redis instance with streams support
    // 2. A MongoDB instance
    // 3. A fixture CSV replayed through the importer
    //
    // The pure pieces (keying, parsing, rounding, clock advancement, range
    // partitioning) are covered by unit tests next to the code.

    #[test]
    #[ignore] // Requires Redis and MongoDB
    fn test_drain_totals_match_input_placeholder() {
        // TODO: Implement with test containers:
        // - Import a fixture CSV with known per-(day, type, method) sums
        // - Wait for the stream to drain
        // - Assert hot hashes equal the expected sums
        // - Assert the virtual clock equals the max input timestamp
        todo!("End-to-end totals verified manually against docker-compose");
    }

    #[test]
    #[ignore] // Requires Redis and MongoDB
    fn test_archive_then_query_merges_tiers_placeholder() {
        // TODO: Implement with test containers:
        // - Seed days on both sides of the retention boundary
        // - Run one archive cycle to quiescence
        // - Assert aged days moved to MongoDB and left the tracked set
        // - Assert /stats over the full range returns both tiers merged
        todo!("Tier merge verified manually against docker-compose");
    }
}
