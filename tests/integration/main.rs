mod mock_exchange;
mod scouting;
