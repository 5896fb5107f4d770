pub mod volunteer_repo;
