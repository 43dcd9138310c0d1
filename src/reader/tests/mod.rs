mod tests_get;
