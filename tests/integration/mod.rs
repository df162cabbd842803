mod estimation;
mod persistence_round_trip;
mod table_lifecycle;
