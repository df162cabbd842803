mod concurrent_mutations;
